//! MCP (Model Context Protocol) client library for the agent gateway
//!
//! This crate connects to MCP servers over stdio or HTTP and exposes their
//! tools through the shared `ToolRegistry`.

pub mod config;
pub mod connector;
pub mod error;
pub mod naming;
pub mod protocol;
pub mod tool;
pub mod transports;
pub mod types;

pub use config::*;
pub use connector::{ConnectError, McpConnector, ServerFailure};
pub use error::{McpError, Result};
pub use naming::build_mcp_tool_name;
pub use protocol::{McpClient, McpTransport};
pub use tool::{render_call_result, McpToolWrapper};
pub use transports::{open_transport, HttpTransport, StdioTransport};
pub use types::*;
