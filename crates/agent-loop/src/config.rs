/// Configuration for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    /// Model round-trips allowed in one turn before giving up.
    pub max_iterations: usize,
    /// Model override passed to the provider; `None` uses its default.
    pub model: Option<String>,
    /// Inserted at the front of the session when it has no system message.
    pub system_prompt: Option<String>,
    /// Channel identity handed to tools through `ToolContext`.
    pub channel: Option<String>,
    pub chat_id: Option<String>,
    /// If true, skip appending the initial user message (already present in session).
    pub skip_initial_user_message: bool,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            model: None,
            system_prompt: None,
            channel: None,
            chat_id: None,
            skip_initial_user_message: false,
        }
    }
}
