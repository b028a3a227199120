//! Message framing for stdio servers.
//!
//! Outgoing messages use `Content-Length` framing. Incoming messages may use
//! either that framing or one JSON document per line; the first non-blank
//! byte of each message decides which.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{McpError, Result};

pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

pub fn encode_frame(body: &str) -> String {
    format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
}

/// Reads the next message. `Ok(None)` means a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();

    // Skip blank lines between messages
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            break;
        }
    }

    let first = line.trim_start();
    if first.starts_with('{') || first.starts_with('[') {
        return serde_json::from_str(first.trim_end())
            .map(Some)
            .map_err(|e| McpError::Protocol(format!("invalid JSON line: {}", e)));
    }

    let mut content_length = None;
    loop {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let length = value.trim().parse::<usize>().map_err(|_| {
                    McpError::Protocol(format!("invalid Content-Length: {}", value.trim()))
                })?;
                content_length = Some(length);
            }
        }

        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(McpError::Protocol("stream ended inside headers".to_string()));
        }
        if line.trim().is_empty() {
            break;
        }
    }

    let length = content_length
        .ok_or_else(|| McpError::Protocol("frame is missing Content-Length".to_string()))?;
    if length > MAX_FRAME_BYTES {
        return Err(McpError::Protocol(format!(
            "frame of {} bytes exceeds limit",
            length
        )));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| McpError::Protocol(format!("invalid JSON frame: {}", e)))
}
