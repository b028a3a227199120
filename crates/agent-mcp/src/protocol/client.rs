use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{McpError, Result};
use crate::protocol::models::*;

/// Transport trait for MCP communication.
///
/// A transport owns request/response correlation: `request` resolves with the
/// response whose id matches the request id, or fails with a transport error,
/// `Disconnected` once closed, or `Cancelled` when the token fires first.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn request(
        &self,
        request: JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse>;

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Idempotent. Outstanding requests fail with `Disconnected`.
    async fn close(&self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// MCP protocol client for a single server
pub struct McpClient {
    server: String,
    transport: Box<dyn McpTransport>,
    next_id: AtomicU64,
    server_info: Mutex<Option<McpInitializeResult>>,
}

impl McpClient {
    pub fn new(server: impl Into<String>, transport: Box<dyn McpTransport>) -> Self {
        Self {
            server: server.into(),
            transport,
            next_id: AtomicU64::new(1),
            server_info: Mutex::new(None),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server
    }

    pub fn server_info(&self) -> Option<McpInitializeResult> {
        self.server_info.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(server = %self.server, id, method, "sending request");

        let response = self
            .transport
            .request(JsonRpcRequest::new(id, method, params), cancel)
            .await?;

        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        response
            .result
            .ok_or_else(|| McpError::Protocol(format!("{} response is missing result", method)))
    }

    /// Runs the initialize handshake and sends `notifications/initialized`.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<McpInitializeResult> {
        let params = serde_json::to_value(McpInitializeRequest::default())?;
        let result = self.send_request("initialize", Some(params), cancel).await?;
        let result: McpInitializeResult = serde_json::from_value(result)?;

        self.transport
            .notify(JsonRpcNotification::new("notifications/initialized", None))
            .await?;

        info!(
            server = %self.server,
            protocol = %result.protocol_version,
            remote = result.server_info.as_ref().map(|i| i.name.as_str()).unwrap_or("unknown"),
            "MCP server initialized"
        );
        *self.server_info.lock() = Some(result.clone());
        Ok(result)
    }

    /// Lists every tool, following `nextCursor` until the server stops paging.
    pub async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<McpToolInfo>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        loop {
            let params = serde_json::to_value(McpToolListRequest {
                cursor: cursor.clone(),
            })?;
            let result = self.send_request("tools/list", Some(params), cancel).await?;
            let page: McpToolListResult = serde_json::from_value(result)?;
            tools.extend(page.tools);

            match page.next_cursor.filter(|next| !next.is_empty()) {
                Some(next) => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(McpError::Protocol(format!(
                            "tools/list repeated cursor {}",
                            next
                        )));
                    }
                    cursor = Some(next);
                }
                None => break,
            }
        }

        debug!(server = %self.server, count = tools.len(), "listed tools");
        Ok(tools)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<McpToolCallResult> {
        let params = serde_json::to_value(McpToolCallRequest {
            name: name.to_string(),
            arguments,
        })?;
        let result = self.send_request("tools/call", Some(params), cancel).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        self.send_request("ping", None, cancel).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}
