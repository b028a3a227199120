use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_core::tools::{ToolCall, ToolContext, ToolRegistry};
use agent_core::{AgentError, AgentEvent, Message, Session};
use agent_llm::LLMProvider;

use crate::config::AgentLoopConfig;
use crate::stream::handler::consume_llm_stream;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model answered without requesting tools.
    Completed,
    /// The iteration budget ran out while the model kept calling tools.
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub final_answer: String,
    pub iterations: usize,
}

/// Runs one user turn: model call, tool execution, repeat until the model
/// answers in plain text or `max_iterations` is reached.
///
/// Messages are appended to `session` as the turn progresses, so a cancelled
/// or failed turn leaves everything produced so far in place.
pub async fn run_agent_loop(
    session: &mut Session,
    initial_message: String,
    event_tx: mpsc::Sender<AgentEvent>,
    llm: Arc<dyn LLMProvider>,
    tools: Arc<ToolRegistry>,
    cancel_token: CancellationToken,
    config: AgentLoopConfig,
) -> Result<TurnOutcome> {
    let debug_logger = DebugLogger::new(log::log_enabled!(log::Level::Debug));
    let session_id = session.id.clone();

    log::debug!(
        "[{}] Starting agent loop with message: {}",
        session_id,
        initial_message
    );
    debug_logger.log_event(
        &session_id,
        "agent_loop_start",
        serde_json::json!({
            "max_iterations": config.max_iterations,
            "initial_message_count": session.messages.len(),
            "tool_count": tools.len(),
        }),
    );

    if let Some(system_prompt) = config.system_prompt.as_deref() {
        if !session.has_system_message() {
            session.messages.insert(0, Message::system(system_prompt));
        }
    }

    if !config.skip_initial_user_message {
        session.add_message(Message::user(initial_message));
    }

    let mut tool_ctx = ToolContext::new(cancel_token.clone()).with_session(session_id.clone());
    tool_ctx.channel = config.channel.clone();
    tool_ctx.chat_id = config.chat_id.clone();

    for iteration in 1..=config.max_iterations {
        if cancel_token.is_cancelled() {
            log::info!("[{}] Agent loop cancelled", session_id);
            return Err(AgentError::Cancelled);
        }

        debug_logger.log_event(
            &session_id,
            "iteration_start",
            serde_json::json!({
                "iteration": iteration,
                "message_count": session.messages.len(),
            }),
        );

        let tool_schemas = tools.list_tools();

        let timer = Timer::new("llm_request");
        let stream = match llm
            .chat_stream(&session.messages, &tool_schemas, config.model.as_deref())
            .await
        {
            Ok(stream) => stream,
            Err(error) => {
                log::error!("[{}] LLM request failed: {}", session_id, error);
                send_event(
                    &event_tx,
                    &session_id,
                    AgentEvent::Error {
                        message: error.to_string(),
                    },
                )
                .await;
                return Err(AgentError::LLM(error.to_string()));
            }
        };

        let output = consume_llm_stream(stream, &event_tx, &cancel_token, &session_id).await?;
        timer.debug(&session_id);
        log::debug!(
            "[{}] Iteration {} received {} token chunks and {} tool calls",
            session_id,
            iteration,
            output.token_count,
            output.response.tool_calls.len()
        );

        let response = output.response;

        if response.tool_calls.is_empty() {
            session.add_message(Message::assistant(response.content.clone(), None));
            send_event(
                &event_tx,
                &session_id,
                AgentEvent::Complete {
                    iterations: iteration,
                    reached_limit: false,
                },
            )
            .await;

            log::info!(
                "[{}] Agent loop completed after {} iteration(s)",
                session_id,
                iteration
            );
            return Ok(TurnOutcome {
                status: TurnStatus::Completed,
                final_answer: response.content,
                iterations: iteration,
            });
        }

        session.add_message(Message::assistant(
            response.content,
            Some(response.tool_calls.clone()),
        ));

        for tool_call in &response.tool_calls {
            let result = execute_tool_call(tool_call, &tools, &tool_ctx, &event_tx, &session_id).await;
            session.add_message(Message::tool_result(tool_call.id.clone(), result));
        }
    }

    let final_answer = format!(
        "Reached {} iterations without completion.",
        config.max_iterations
    );
    log::warn!("[{}] {}", session_id, final_answer);

    send_event(
        &event_tx,
        &session_id,
        AgentEvent::Complete {
            iterations: config.max_iterations,
            reached_limit: true,
        },
    )
    .await;

    Ok(TurnOutcome {
        status: TurnStatus::MaxIterations,
        final_answer,
        iterations: config.max_iterations,
    })
}

/// Executes one call and returns the text fed back to the model.
async fn execute_tool_call(
    tool_call: &ToolCall,
    tools: &ToolRegistry,
    tool_ctx: &ToolContext,
    event_tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
) -> String {
    let args = parse_tool_args(&tool_call.function.arguments, session_id, &tool_call.id);

    send_event(
        event_tx,
        session_id,
        AgentEvent::ToolStart {
            tool_call_id: tool_call.id.clone(),
            tool_name: tool_call.function.name.clone(),
            arguments: args.clone(),
        },
    )
    .await;

    let timer = Timer::new(format!("tool_{}", tool_call.function.name));
    let outcome = tools
        .execute(tool_ctx, &tool_call.function.name, args)
        .await;
    timer.debug(session_id);

    match outcome {
        Ok(result) => {
            send_event(
                event_tx,
                session_id,
                AgentEvent::ToolComplete {
                    tool_call_id: tool_call.id.clone(),
                    result: result.clone(),
                },
            )
            .await;
            result
        }
        Err(error) => {
            log::warn!(
                "[{}] Tool {} failed: {}",
                session_id,
                tool_call.function.name,
                error
            );
            send_event(
                event_tx,
                session_id,
                AgentEvent::ToolError {
                    tool_call_id: tool_call.id.clone(),
                    error: error.to_string(),
                },
            )
            .await;
            format!("Error: {}", error)
        }
    }
}

/// Malformed or non-object arguments become an empty object.
fn parse_tool_args(raw: &str, session_id: &str, call_id: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            log::warn!(
                "[{}] Tool call {} arguments are not an object: {}",
                session_id,
                call_id,
                other
            );
            Value::Object(Default::default())
        }
        Err(error) => {
            log::warn!(
                "[{}] Tool call {} has invalid JSON arguments: {}",
                session_id,
                call_id,
                error
            );
            Value::Object(Default::default())
        }
    }
}

async fn send_event(event_tx: &mpsc::Sender<AgentEvent>, session_id: &str, event: AgentEvent) {
    if event_tx.send(event).await.is_err() {
        log::debug!("[{}] Event receiver dropped", session_id);
    }
}

struct DebugLogger {
    enabled: bool,
}

impl DebugLogger {
    fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn log_event(&self, session_id: &str, event_type: &str, details: serde_json::Value) {
        if !self.enabled {
            return;
        }

        log::debug!("[{}] {}: {}", session_id, event_type, details);
    }
}

struct Timer {
    name: String,
    start: std::time::Instant,
}

impl Timer {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: std::time::Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }

    fn debug(&self, session_id: &str) {
        log::debug!(
            "[{}] {} completed in {}ms",
            session_id,
            self.name,
            self.elapsed_ms()
        );
    }
}
