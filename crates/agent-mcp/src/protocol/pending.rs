use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{McpError, Result};
use crate::protocol::models::JsonRpcResponse;

type Waiter = oneshot::Sender<Result<JsonRpcResponse>>;

/// Table of requests awaiting a response, keyed by normalized id.
///
/// Each registration gets a generation number so a guard from an earlier
/// request can never remove a later request that reused the same id.
#[derive(Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<String, (u64, Waiter)>>,
    generation: AtomicU64,
}

impl PendingRequests {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(
        self: &Arc<Self>,
        key: String,
    ) -> Result<(PendingGuard, oneshot::Receiver<Result<JsonRpcResponse>>)> {
        let (tx, rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(McpError::Protocol(format!(
                "request id {} is already in flight",
                key
            )));
        }
        entries.insert(key.clone(), (generation, tx));

        Ok((
            PendingGuard {
                table: Arc::clone(self),
                key,
                generation,
            },
            rx,
        ))
    }

    /// Hands a response to its waiter. Returns false when nobody is waiting.
    pub fn deliver(&self, response: JsonRpcResponse) -> bool {
        let Some(key) = response.id.as_ref().and_then(normalize_id) else {
            return false;
        };
        let waiter = self.entries.lock().remove(&key);
        match waiter {
            Some((_, tx)) => tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    pub fn fail_all(&self, error: McpError) {
        let drained: Vec<Waiter> = self
            .entries
            .lock()
            .drain()
            .map(|(_, (_, tx))| tx)
            .collect();
        for tx in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_if_current(&self, key: &str, generation: u64) {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|(current, _)| *current == generation) {
            entries.remove(key);
        }
    }
}

/// Removes its pending entry when the request future is dropped or finishes.
pub struct PendingGuard {
    table: Arc<PendingRequests>,
    key: String,
    generation: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove_if_current(&self.key, self.generation);
    }
}

/// Canonical string form of a JSON-RPC id so `7`, `7.0` and `"7"` match.
pub fn normalize_id(id: &Value) -> Option<String> {
    match id {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(normalize_float)
            }
        }
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Some(i.to_string())
            } else if let Ok(f) = trimmed.parse::<f64>() {
                Some(normalize_float(f))
            } else {
                Some(s.clone())
            }
        }
        _ => None,
    }
}

fn normalize_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.0e15 {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}
