pub mod accumulator;
pub mod context;
pub mod error;
pub mod registry;
pub mod types;

pub use accumulator::{AccumulatedResponse, StreamAccumulator};
pub use context::ToolContext;
pub use error::ToolError;
pub use registry::{RegistryError, SharedTool, Tool, ToolRegistry};
pub use types::{FunctionCall, FunctionSchema, ToolCall, ToolSchema};
