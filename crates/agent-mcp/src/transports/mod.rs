pub mod framing;
pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use crate::config::{McpServerConfig, TransportConfig};
use crate::error::Result;
use crate::protocol::client::McpTransport;

/// Builds the transport a server entry asks for.
///
/// Stdio servers are spawned immediately, so this must run inside a tokio
/// runtime.
pub fn open_transport(server: &str, config: &McpServerConfig) -> Result<Box<dyn McpTransport>> {
    match config.transport()? {
        TransportConfig::Stdio(stdio) => Ok(Box::new(StdioTransport::spawn(server, &stdio)?)),
        TransportConfig::Http(http) => Ok(Box::new(HttpTransport::new(server, &http)?)),
    }
}
