pub mod agent;
pub mod tools;

pub use agent::events::AgentEvent;
pub use agent::types::{Message, Role, Session};
pub use agent::AgentError;
pub use tools::{
    AccumulatedResponse, FunctionCall, FunctionSchema, RegistryError, SharedTool,
    StreamAccumulator, Tool, ToolCall, ToolContext, ToolError, ToolRegistry, ToolSchema,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
