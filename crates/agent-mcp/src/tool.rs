use agent_core::tools::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::McpError;
use crate::naming::build_mcp_tool_name;
use crate::protocol::client::McpClient;
use crate::protocol::models::{McpContentItem, McpToolCallResult, McpToolInfo};

/// Exposes one remote MCP tool through the local `Tool` trait.
pub struct McpToolWrapper {
    client: Arc<McpClient>,
    server: String,
    remote_name: String,
    registered_name: String,
    description: String,
    schema: Value,
}

impl McpToolWrapper {
    pub fn new(client: Arc<McpClient>, info: McpToolInfo) -> Self {
        let server = client.server_name().to_string();
        let registered_name = build_mcp_tool_name(&server, &info.name);
        Self {
            client,
            registered_name,
            remote_name: info.name,
            description: info.description,
            schema: info
                .input_schema
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            server,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }
}

/// Text blocks joined by newlines, followed by any structured content.
pub fn render_call_result(result: &McpToolCallResult) -> String {
    let mut parts: Vec<String> = result
        .content
        .iter()
        .filter_map(|item| match item {
            McpContentItem::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect();

    if let Some(structured) = &result.structured_content {
        match serde_json::to_string_pretty(structured) {
            Ok(pretty) => parts.push(pretty),
            Err(e) => warn!(error = %e, "failed to render structured content"),
        }
    }

    let rendered = parts.join("\n");
    if rendered.trim().is_empty() {
        "(no output)".to_string()
    } else {
        rendered
    }
}

#[async_trait]
impl Tool for McpToolWrapper {
    fn name(&self) -> &str {
        &self.registered_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<String, ToolError> {
        debug!(
            server = %self.server,
            tool = %self.remote_name,
            "calling MCP tool"
        );

        let result = self
            .client
            .call_tool(&self.remote_name, args, &ctx.cancel_token)
            .await
            .map_err(|e| match e {
                McpError::Cancelled => ToolError::Cancelled,
                other => ToolError::Execution(format!("MCP error: {}", other)),
            })?;

        let rendered = render_call_result(&result);
        if result.is_error {
            return Err(ToolError::Execution(rendered));
        }
        Ok(rendered)
    }
}
