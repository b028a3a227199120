use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_core::tools::{AccumulatedResponse, StreamAccumulator};
use agent_core::{AgentError, AgentEvent};
use agent_llm::{LLMChunk, LLMStream};

pub struct StreamHandlingOutput {
    pub response: AccumulatedResponse,
    /// Number of `Token` chunks received.
    pub token_count: usize,
}

/// Drains one model response, mirroring text tokens to `event_tx`.
pub async fn consume_llm_stream(
    mut stream: LLMStream,
    event_tx: &mpsc::Sender<AgentEvent>,
    cancel_token: &CancellationToken,
    session_id: &str,
) -> Result<StreamHandlingOutput, AgentError> {
    let mut accumulator = StreamAccumulator::new();
    let mut token_count = 0usize;

    loop {
        let next = tokio::select! {
            _ = cancel_token.cancelled() => return Err(AgentError::Cancelled),
            next = stream.next() => next,
        };

        let Some(chunk_result) = next else {
            break;
        };

        match chunk_result {
            Ok(LLMChunk::Token(token)) => {
                token_count += 1;
                accumulator.on_content(&token);

                if event_tx
                    .send(AgentEvent::Token { content: token })
                    .await
                    .is_err()
                {
                    log::debug!("[{}] Event receiver dropped", session_id);
                }
            }
            Ok(LLMChunk::ToolCallStart { id, name }) => {
                log::debug!("[{}] Tool call {} started: {}", session_id, id, name);
                accumulator.on_tool_call_start(&id, &name);
            }
            Ok(LLMChunk::ToolCallDelta { id, arguments }) => {
                accumulator.on_tool_call_delta(&id, &arguments);
            }
            Ok(LLMChunk::ToolCallEnd { id }) => {
                accumulator.on_tool_call_end(&id);
            }
            Ok(LLMChunk::Done) => {
                log::debug!("[{}] LLM stream completed", session_id);
                break;
            }
            Err(error) => {
                let message = format!("Stream error: {error}");
                let _ = event_tx
                    .send(AgentEvent::Error {
                        message: message.clone(),
                    })
                    .await;
                return Err(AgentError::LLM(error.to_string()));
            }
        }
    }

    let response = accumulator.finish();
    if !response.unterminated.is_empty() {
        log::warn!(
            "[{}] Dropping tool calls that never ended: {:?}",
            session_id,
            response.unterminated
        );
    }

    Ok(StreamHandlingOutput {
        response,
        token_count,
    })
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use agent_core::AgentEvent;
    use agent_llm::{LLMError, LLMStream};

    use super::*;

    fn build_stream(items: Vec<agent_llm::Result<LLMChunk>>) -> LLMStream {
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn consume_llm_stream_accumulates_tokens_and_tool_calls() {
        let mut items = vec![Ok(LLMChunk::token("hel")), Ok(LLMChunk::token("lo"))];
        items.push(Ok(LLMChunk::ToolCallStart {
            id: "call_1".to_string(),
            name: "test_tool".to_string(),
        }));
        items.push(Ok(LLMChunk::ToolCallDelta {
            id: "call_1".to_string(),
            arguments: "{".to_string(),
        }));
        items.push(Ok(LLMChunk::ToolCallDelta {
            id: "call_1".to_string(),
            arguments: "}".to_string(),
        }));
        items.push(Ok(LLMChunk::ToolCallEnd {
            id: "call_1".to_string(),
        }));
        items.push(Ok(LLMChunk::Done));

        let (event_tx, mut event_rx) = mpsc::channel::<AgentEvent>(8);
        let output = consume_llm_stream(
            build_stream(items),
            &event_tx,
            &CancellationToken::new(),
            "session-1",
        )
        .await
        .expect("stream should succeed");

        assert_eq!(output.response.content, "hello");
        assert_eq!(output.token_count, 2);
        assert_eq!(output.response.tool_calls.len(), 1);
        assert_eq!(output.response.tool_calls[0].function.name, "test_tool");
        assert_eq!(output.response.tool_calls[0].function.arguments, "{}");

        match event_rx.try_recv() {
            Ok(AgentEvent::Token { content }) => assert_eq!(content, "hel"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_error_emits_error_event() {
        let stream = build_stream(vec![
            Ok(LLMChunk::token("partial")),
            Err(LLMError::Stream("connection reset".to_string())),
        ]);

        let (event_tx, mut event_rx) = mpsc::channel::<AgentEvent>(8);
        let result =
            consume_llm_stream(stream, &event_tx, &CancellationToken::new(), "session-2").await;

        assert!(matches!(result, Err(AgentError::LLM(message)) if message.contains("connection reset")));

        let mut saw_error = false;
        while let Ok(event) = event_rx.try_recv() {
            if let AgentEvent::Error { message } = event {
                saw_error = message.contains("connection reset");
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn cancelled_token_stops_pending_stream() {
        let stream: LLMStream = Box::pin(stream::pending::<agent_llm::Result<LLMChunk>>());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (event_tx, _event_rx) = mpsc::channel::<AgentEvent>(8);
        let result = consume_llm_stream(stream, &event_tx, &cancel, "session-3").await;

        assert!(matches!(result, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn unterminated_calls_are_not_returned() {
        let stream = build_stream(vec![Ok(LLMChunk::ToolCallStart {
            id: "dangling".to_string(),
            name: "search".to_string(),
        })]);

        let (event_tx, _event_rx) = mpsc::channel::<AgentEvent>(8);
        let output = consume_llm_stream(stream, &event_tx, &CancellationToken::new(), "session-4")
            .await
            .unwrap();

        assert!(output.response.tool_calls.is_empty());
        assert_eq!(output.response.unterminated, vec!["dangling".to_string()]);
    }
}
