pub mod client;
pub mod models;
pub mod pending;

pub use client::{McpClient, McpTransport};
pub use models::*;
pub use pending::{normalize_id, PendingGuard, PendingRequests};
