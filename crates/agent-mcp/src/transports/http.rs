use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HttpConfig;
use crate::error::{McpError, Result};
use crate::protocol::client::McpTransport;
use crate::protocol::models::{
    IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
};
use crate::protocol::pending::normalize_id;

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Streamable HTTP transport: every message is an independent POST.
pub struct HttpTransport {
    server: String,
    client: Client,
    url: String,
    headers: HeaderMap,
    session_id: parking_lot::Mutex<Option<String>>,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(server: impl Into<String>, config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;

        Ok(Self {
            server: server.into(),
            client,
            url: config.url.clone(),
            headers: build_headers(config)?,
            session_id: parking_lot::Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    async fn post(&self, body: String) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .body(body);

        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            let mut current = self.session_id.lock();
            if current.as_deref() != Some(session) {
                debug!(server = %self.server, session, "captured MCP session id");
                *current = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!("HTTP {}: {}", status, body)));
        }

        Ok(response)
    }

    async fn exchange(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let expected = request.id.to_string();
        let response = self.post(serde_json::to_string(&request)?).await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));

        if is_event_stream {
            read_sse_response(response.bytes_stream(), &expected).await
        } else {
            let bytes = response.bytes().await?;
            parse_json_body(&bytes, &expected)
        }
    }
}

fn build_headers(config: &HttpConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| McpError::InvalidConfig(format!("Invalid header name {}: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| McpError::InvalidConfig(format!("Invalid header value for {}: {}", name, e)))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

fn matches_expected(value: Value, expected: &str) -> Option<JsonRpcResponse> {
    match IncomingMessage::classify(value) {
        IncomingMessage::Response(response)
            if response.id.as_ref().and_then(normalize_id).as_deref() == Some(expected) =>
        {
            Some(response)
        }
        _ => None,
    }
}

/// Picks the response with the expected id out of a JSON object or batch.
pub fn parse_json_body(bytes: &[u8], expected: &str) -> Result<JsonRpcResponse> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| McpError::Protocol(format!("invalid JSON response body: {}", e)))?;

    let candidates = match value {
        Value::Array(batch) => batch,
        single => vec![single],
    };

    candidates
        .into_iter()
        .find_map(|candidate| matches_expected(candidate, expected))
        .ok_or_else(|| McpError::Protocol(format!("no response with id {} in body", expected)))
}

/// Scans an SSE body for the first event carrying the expected response.
/// Events that are not JSON, or answer a different id, are skipped.
pub async fn read_sse_response<S, B, E>(stream: S, expected: &str) -> Result<JsonRpcResponse>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut events = std::pin::pin!(stream.eventsource());

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| McpError::Transport(format!("SSE stream error: {}", e)))?;
        if event.data.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(&event.data) {
            Ok(Value::Array(batch)) => {
                if let Some(response) = batch
                    .into_iter()
                    .find_map(|candidate| matches_expected(candidate, expected))
                {
                    return Ok(response);
                }
            }
            Ok(value) => {
                if let Some(response) = matches_expected(value, expected) {
                    return Ok(response);
                }
            }
            Err(e) => debug!(error = %e, "skipping non-JSON SSE event"),
        }
    }

    Err(McpError::Protocol(format!(
        "event stream ended without a response for id {}",
        expected
    )))
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(
        &self,
        request: JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse> {
        if cancel.is_cancelled() {
            return Err(McpError::Cancelled);
        }
        if !self.is_connected() {
            return Err(McpError::Disconnected);
        }

        tokio::select! {
            response = self.exchange(request) => response,
            _ = cancel.cancelled() => Err(McpError::Cancelled),
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::Disconnected);
        }
        // Servers answer notifications with 202 and usually no body.
        self.post(serde_json::to_string(&notification)?).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(session) = self.session_id() else {
            return Ok(());
        };

        info!(server = %self.server, "ending MCP HTTP session");
        let result = self
            .client
            .delete(&self.url)
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session)
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                debug!(server = %self.server, status = %response.status(), "session DELETE rejected");
            }
            Ok(_) => {}
            Err(e) => warn!(server = %self.server, error = %e, "session DELETE failed"),
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}
