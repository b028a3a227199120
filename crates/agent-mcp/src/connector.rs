use agent_core::tools::{Tool, ToolRegistry};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{McpConfig, McpServerConfig};
use crate::error::{McpError, Result};
use crate::protocol::client::McpClient;
use crate::protocol::models::McpToolInfo;
use crate::tool::McpToolWrapper;
use crate::transports::open_transport;
use crate::types::{ConnectorState, McpEvent, RegisteredTool, ServerStatus};

/// One server that could not be brought up, or one of its tools that could
/// not be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFailure {
    pub server: String,
    pub message: String,
}

/// Aggregate of every failure seen during a connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectError {
    pub failures: Vec<ServerFailure>,
}

impl ConnectError {
    pub fn failed_servers(&self) -> Vec<&str> {
        let mut servers: Vec<&str> = self.failures.iter().map(|f| f.server.as_str()).collect();
        servers.dedup();
        servers
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MCP connect failed: ")?;
        for (index, failure) in self.failures.iter().enumerate() {
            if index > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", failure.server, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConnectError {}

#[derive(Default)]
struct ConnectorInner {
    clients: BTreeMap<String, Arc<McpClient>>,
    registered: Vec<RegisteredTool>,
    statuses: BTreeMap<String, ServerStatus>,
    last_error: Option<ConnectError>,
}

/// Connects the configured MCP servers once and registers their tools.
pub struct McpConnector {
    config: McpConfig,
    phase: watch::Sender<ConnectorState>,
    inner: Mutex<ConnectorInner>,
    event_tx: Option<mpsc::Sender<McpEvent>>,
}

/// Settles the phase as failed if the connecting future is dropped midway,
/// so waiters are never left hanging.
struct SettleGuard<'a> {
    connector: &'a McpConnector,
    armed: bool,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.connector.inner.lock().last_error = Some(ConnectError {
                failures: vec![ServerFailure {
                    server: "*".to_string(),
                    message: "connect was aborted".to_string(),
                }],
            });
            self.connector.phase.send_replace(ConnectorState::Failed);
        }
    }
}

impl McpConnector {
    pub fn new(config: McpConfig) -> Self {
        let (phase, _) = watch::channel(ConnectorState::NotConnected);
        Self {
            config,
            phase,
            inner: Mutex::new(ConnectorInner::default()),
            event_tx: None,
        }
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<McpEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn state(&self) -> ConnectorState {
        *self.phase.borrow()
    }

    pub fn server_status(&self, server: &str) -> Option<ServerStatus> {
        self.inner.lock().statuses.get(server).copied()
    }

    pub fn last_error(&self) -> Option<ConnectError> {
        self.inner.lock().last_error.clone()
    }

    /// Registered tools sorted by registry name.
    pub fn registered_tools(&self) -> Vec<RegisteredTool> {
        let mut tools = self.inner.lock().registered.clone();
        tools.sort_by(|a, b| a.registered_name.cmp(&b.registered_name));
        tools
    }

    /// Connects every enabled server and registers its tools.
    ///
    /// Runs at most once. Concurrent callers wait for the first attempt to
    /// settle and later callers get its cached outcome.
    pub async fn connect(
        &self,
        registry: &ToolRegistry,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), ConnectError> {
        let claimed = self.phase.send_if_modified(|state| {
            if *state == ConnectorState::NotConnected {
                *state = ConnectorState::Connecting;
                true
            } else {
                false
            }
        });

        if !claimed {
            let mut rx = self.phase.subscribe();
            // The sender lives in `self`, so this only ends once settled.
            let _ = rx.wait_for(|state| state.is_settled()).await;
            return match self.last_error() {
                Some(error) => Err(error),
                None => Ok(()),
            };
        }

        let mut guard = SettleGuard {
            connector: self,
            armed: true,
        };

        let mut failures = Vec::new();
        let mut healthy = 0usize;
        let mut enabled = 0usize;

        for (name, server_config) in self.config.enabled_servers() {
            enabled += 1;
            self.set_status(name, ServerStatus::Connecting, None);

            match self
                .connect_server(name, server_config, registry, cancel, &mut failures)
                .await
            {
                Ok(tools) => {
                    healthy += 1;
                    info!(server = %name, tools = tools.len(), "MCP server ready");
                    self.set_status(name, ServerStatus::Ready, None);
                    self.emit(McpEvent::ToolsChanged {
                        server: name.clone(),
                        tools: tools.iter().map(|t| t.registered_name.clone()).collect(),
                    });
                    self.inner.lock().registered.extend(tools);
                }
                Err(e) => {
                    error!(server = %name, error = %e, "failed to connect MCP server");
                    self.set_status(name, ServerStatus::Error, Some(e.to_string()));
                    failures.push(ServerFailure {
                        server: name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let outcome = if failures.is_empty() {
            None
        } else {
            Some(ConnectError { failures })
        };

        let phase = if enabled == 0 || healthy > 0 {
            ConnectorState::Connected
        } else {
            ConnectorState::Failed
        };

        self.inner.lock().last_error = outcome.clone();
        guard.armed = false;
        self.phase.send_replace(phase);
        info!(
            servers = enabled,
            healthy,
            state = ?phase,
            "MCP connect finished"
        );

        match outcome {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn connect_server(
        &self,
        name: &str,
        config: &McpServerConfig,
        registry: &ToolRegistry,
        cancel: &CancellationToken,
        failures: &mut Vec<ServerFailure>,
    ) -> Result<Vec<RegisteredTool>> {
        if cancel.is_cancelled() {
            return Err(McpError::Cancelled);
        }

        let transport = open_transport(name, config)?;
        let client = Arc::new(McpClient::new(name, transport));

        let tools = match handshake(&client, cancel).await {
            Ok(tools) => tools,
            Err(e) => {
                if let Err(close_error) = client.close().await {
                    debug!(server = %name, error = %close_error, "close after failed handshake");
                }
                return Err(e);
            }
        };

        let mut registered = Vec::with_capacity(tools.len());
        for info in tools {
            let remote_name = info.name.clone();
            let wrapper = McpToolWrapper::new(Arc::clone(&client), info);
            let registered_name = wrapper.name().to_string();

            match registry.register(wrapper) {
                Ok(()) => {
                    debug!(server = %name, tool = %registered_name, "registered MCP tool");
                    registered.push(RegisteredTool {
                        server: name.to_string(),
                        remote_name,
                        registered_name,
                    });
                }
                Err(e) => {
                    warn!(server = %name, tool = %remote_name, error = %e, "skipping MCP tool");
                    failures.push(ServerFailure {
                        server: name.to_string(),
                        message: McpError::Registration(e.to_string()).to_string(),
                    });
                }
            }
        }

        self.inner.lock().clients.insert(name.to_string(), client);
        Ok(registered)
    }

    /// Unregisters this connector's tools from `registry` and closes every
    /// live client. The connector does not reconnect afterwards.
    pub async fn close(&self, registry: &ToolRegistry) {
        let (clients, registered) = {
            let mut inner = self.inner.lock();
            for status in inner.statuses.values_mut() {
                *status = ServerStatus::Stopped;
            }
            (
                std::mem::take(&mut inner.clients),
                std::mem::take(&mut inner.registered),
            )
        };

        let mut removed: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for tool in registered {
            if registry.unregister(&tool.registered_name) {
                removed
                    .entry(tool.server)
                    .or_default()
                    .push(tool.registered_name);
            }
        }
        for (server, tools) in removed {
            debug!(server = %server, count = tools.len(), "unregistered MCP tools");
            self.emit(McpEvent::ToolsChanged {
                server,
                tools: Vec::new(),
            });
        }

        for (name, client) in clients {
            if let Err(e) = client.close().await {
                warn!(server = %name, error = %e, "failed to close MCP client");
            }
            self.emit(McpEvent::ServerStatusChanged {
                server: name,
                status: ServerStatus::Stopped,
                error: None,
            });
        }
    }

    fn set_status(&self, server: &str, status: ServerStatus, error: Option<String>) {
        self.inner
            .lock()
            .statuses
            .insert(server.to_string(), status);
        self.emit(McpEvent::ServerStatusChanged {
            server: server.to_string(),
            status,
            error,
        });
    }

    fn emit(&self, event: McpEvent) {
        if let Some(tx) = &self.event_tx {
            if let Err(e) = tx.try_send(event) {
                debug!(error = %e, "dropping MCP event");
            }
        }
    }
}

async fn handshake(client: &McpClient, cancel: &CancellationToken) -> Result<Vec<McpToolInfo>> {
    client.initialize(cancel).await?;
    client.list_tools(cancel).await
}
