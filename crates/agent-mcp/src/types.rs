use serde::Serialize;

/// Per-server runtime status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Connecting,
    Ready,
    Error,
    Stopped,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStatus::Connecting => write!(f, "connecting"),
            ServerStatus::Ready => write!(f, "ready"),
            ServerStatus::Error => write!(f, "error"),
            ServerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lifecycle of the connector as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    NotConnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectorState {
    /// True once a connect attempt has finished, successfully or not.
    pub fn is_settled(self) -> bool {
        matches!(self, ConnectorState::Connected | ConnectorState::Failed)
    }
}

/// A tool the connector put into the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredTool {
    pub server: String,
    pub remote_name: String,
    pub registered_name: String,
}

/// Event emitted by the MCP connector
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpEvent {
    ServerStatusChanged {
        server: String,
        status: ServerStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ToolsChanged {
        server: String,
        tools: Vec<String>,
    },
}
