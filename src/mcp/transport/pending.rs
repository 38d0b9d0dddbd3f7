// ABOUTME: Correlates JSON-RPC replies arriving on a background reader with waiting requests.
// ABOUTME: Shared by the stdio and SSE transports, where replies come back out of band.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::McpError;
use crate::mcp::McpResponse;

type Waiters = HashMap<u64, oneshot::Sender<McpResponse>>;

/// Requests awaiting a reply, keyed by JSON-RPC id.
///
/// Once closed, the table stays closed: new registrations fail instead of
/// waiting for a reply that can never arrive.
pub(crate) struct PendingReplies {
    waiters: Mutex<Option<Waiters>>,
}

impl PendingReplies {
    pub(crate) fn new() -> Self {
        Self {
            waiters: Mutex::new(Some(HashMap::new())),
        }
    }

    pub(crate) fn register(&self, id: u64) -> Result<oneshot::Receiver<McpResponse>, McpError> {
        let mut waiters = self.waiters.lock();
        let waiters = waiters
            .as_mut()
            .ok_or_else(|| McpError::Connection("upstream channel is closed".into()))?;
        let (tx, rx) = oneshot::channel();
        waiters.insert(id, tx);
        Ok(rx)
    }

    pub(crate) fn forget(&self, id: u64) {
        if let Some(waiters) = self.waiters.lock().as_mut() {
            waiters.remove(&id);
        }
    }

    /// Route one inbound payload. Requests and notifications from the
    /// server, and replies nobody waits for, are dropped.
    pub(crate) fn deliver(&self, upstream: &str, payload: &str) {
        let response = match serde_json::from_str::<McpResponse>(payload) {
            Ok(r) if r.is_reply() => r,
            _ => {
                debug!(upstream = %upstream, payload = %payload, "Ignoring non-reply message");
                return;
            }
        };
        let waiter = self
            .waiters
            .lock()
            .as_mut()
            .and_then(|w| w.remove(&response.id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(upstream = %upstream, id = response.id, "Reply for unknown request"),
        }
    }

    /// Fail every waiter; used when the underlying channel closes.
    pub(crate) fn close(&self) {
        self.waiters.lock().take();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.waiters.lock().is_none()
    }

    pub(crate) async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<McpResponse>,
        timeout: Duration,
    ) -> Result<McpResponse, McpError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::Connection(
                "upstream closed before replying".into(),
            )),
            Err(_) => {
                self.forget(id);
                Err(McpError::Timeout(timeout))
            }
        }
    }
}
