use serde::{Deserialize, Serialize};

/// Progress of a single agent turn, streamed to UI observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Token {
        content: String,
    },

    ToolStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    ToolComplete {
        tool_call_id: String,
        result: String,
    },

    ToolError {
        tool_call_id: String,
        error: String,
    },

    /// Emitted once per turn, whether the model finished or the iteration
    /// budget ran out.
    Complete {
        iterations: usize,
        reached_limit: bool,
    },

    Error {
        message: String,
    },
}
