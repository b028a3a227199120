use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::StdioConfig;
use crate::error::{McpError, Result};
use crate::protocol::client::McpTransport;
use crate::protocol::models::{
    IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
};
use crate::protocol::pending::PendingRequests;
use crate::transports::framing::{encode_frame, read_message};

/// One outgoing message. `written` reports the write result when the sender
/// needs it.
struct OutgoingFrame {
    body: String,
    written: Option<oneshot::Sender<Result<()>>>,
}

type FrameSender = mpsc::UnboundedSender<OutgoingFrame>;

/// Transport that talks to a child process over its stdin/stdout.
pub struct StdioTransport {
    server: String,
    frames: FrameSender,
    child: Mutex<Option<Child>>,
    pending: Arc<PendingRequests>,
    closed: CancellationToken,
    shut_down: AtomicBool,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    shutdown_grace: Duration,
}

impl StdioTransport {
    /// Spawns the server process and starts the writer, reader and stderr tasks.
    /// Must be called from within a tokio runtime.
    pub fn spawn(server: impl Into<String>, config: &StdioConfig) -> Result<Self> {
        let server = server.into();
        info!(
            server = %server,
            command = %config.command,
            args = ?config.args,
            "starting MCP server process"
        );

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        if !config.env.is_empty() {
            cmd.envs(&config.env);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpError::Connection(format!("failed to spawn '{}': {}", config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture stdout".to_string()))?;
        let stderr = child.stderr.take();

        let (frames, frame_rx) = mpsc::unbounded_channel();
        let pending = PendingRequests::new();
        let closed = CancellationToken::new();
        let span = tracing::info_span!("mcp_stdio", server = %server);

        let mut tasks = vec![
            tokio::spawn(
                write_loop(stdin, frame_rx, Arc::clone(&pending), closed.clone())
                    .instrument(span.clone()),
            ),
            tokio::spawn(
                read_loop(
                    BufReader::new(stdout),
                    frames.clone(),
                    Arc::clone(&pending),
                    closed.clone(),
                )
                .instrument(span.clone()),
            ),
        ];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(drain_stderr(stderr).instrument(span)));
        }

        Ok(Self {
            server,
            frames,
            child: Mutex::new(Some(child)),
            pending,
            closed,
            shut_down: AtomicBool::new(false),
            tasks: parking_lot::Mutex::new(tasks),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn enqueue(&self, body: String, written: Option<oneshot::Sender<Result<()>>>) -> Result<()> {
        self.frames
            .send(OutgoingFrame { body, written })
            .map_err(|_| McpError::Disconnected)
    }
}

async fn write_frame(stdin: &mut ChildStdin, body: &str) -> Result<()> {
    stdin.write_all(encode_frame(body).as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

/// Sole owner of the child's stdin. A frame taken off the queue is written to
/// the end even if its requester has gone away; only closing interrupts it.
async fn write_loop(
    mut stdin: ChildStdin,
    mut frames: mpsc::UnboundedReceiver<OutgoingFrame>,
    pending: Arc<PendingRequests>,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let result = tokio::select! {
            _ = closed.cancelled() => break,
            result = write_frame(&mut stdin, &frame.body) => result,
        };

        match result {
            Ok(()) => {
                if let Some(written) = frame.written {
                    let _ = written.send(Ok(()));
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to write to MCP server, closing transport");
                if let Some(written) = frame.written {
                    let _ = written.send(Err(e.clone()));
                }
                pending.fail_all(e);
                closed.cancel();
                break;
            }
        }
    }
    debug!("writer stopped");
}

async fn read_loop(
    mut reader: BufReader<ChildStdout>,
    frames: FrameSender,
    pending: Arc<PendingRequests>,
    closed: CancellationToken,
) {
    let failure = loop {
        let message = tokio::select! {
            _ = closed.cancelled() => break McpError::Disconnected,
            message = read_message(&mut reader) => message,
        };

        match message {
            Ok(Some(Value::Array(batch))) => {
                for item in batch {
                    dispatch(item, &frames, &pending);
                }
            }
            Ok(Some(value)) => dispatch(value, &frames, &pending),
            Ok(None) => {
                debug!("server closed stdout");
                break McpError::Disconnected;
            }
            Err(e) => {
                warn!(error = %e, "stopping read loop");
                break e;
            }
        }
    };

    // Waiters see the real failure before the closed signal fires.
    pending.fail_all(failure);
    closed.cancel();
}

fn dispatch(value: Value, frames: &FrameSender, pending: &PendingRequests) {
    match IncomingMessage::classify(value) {
        IncomingMessage::Response(response) => {
            let id = response.id.clone();
            if !pending.deliver(response) {
                debug!(id = ?id, "dropping response nobody is waiting for");
            }
        }
        IncomingMessage::Request { id, method, .. } => {
            let reply = if method == "ping" {
                JsonRpcResponse::success(id, json!({}))
            } else {
                debug!(method = %method, "rejecting server request");
                JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("method not found: {}", method))
            };
            match serde_json::to_string(&reply) {
                Ok(body) => {
                    let frame = OutgoingFrame {
                        body,
                        written: None,
                    };
                    if frames.send(frame).is_err() {
                        warn!("failed to answer server request: writer stopped");
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode reply"),
            }
        }
        IncomingMessage::Notification { method, .. } => {
            debug!(method = %method, "server notification");
        }
        IncomingMessage::Invalid(value) => {
            debug!(message = %value, "ignoring unrecognized message");
        }
    }
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!("[stderr] {}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "stderr closed");
                break;
            }
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(
        &self,
        request: JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse> {
        if cancel.is_cancelled() {
            return Err(McpError::Cancelled);
        }
        if self.closed.is_cancelled() {
            return Err(McpError::Disconnected);
        }

        // The guard clears the pending entry on every exit path.
        let (_guard, mut rx) = self.pending.register(request.id.to_string())?;
        let body = serde_json::to_string(&request)?;

        // Write failures reach `rx` through the pending table.
        self.enqueue(body, None)?;

        tokio::select! {
            biased;
            delivered = &mut rx => match delivered {
                Ok(result) => result,
                Err(_) => Err(McpError::Disconnected),
            },
            _ = cancel.cancelled() => Err(McpError::Cancelled),
            _ = self.closed.cancelled() => Err(McpError::Disconnected),
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(McpError::Disconnected);
        }
        let body = serde_json::to_string(&notification)?;
        let (written, result) = oneshot::channel();
        self.enqueue(body, Some(written))?;
        result.await.unwrap_or(Err(McpError::Disconnected))
    }

    async fn close(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(server = %self.server, "closing MCP server process");

        self.pending.fail_all(McpError::Disconnected);
        // Stops the writer, which drops stdin and signals EOF to the server.
        self.closed.cancel();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(server = %self.server, %status, "MCP server process exited");
                }
                Ok(Err(e)) => {
                    warn!(server = %self.server, error = %e, "failed to wait for MCP server process");
                }
                Err(_) => {
                    warn!(server = %self.server, "MCP server process did not exit in time, killing");
                    if let Err(e) = child.kill().await {
                        warn!(server = %self.server, error = %e, "failed to kill MCP server process");
                    }
                }
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
            let _ = task.await;
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
