// ABOUTME: Implements ConnectionRegistry - a thread-safe container for the
// ABOUTME: upstream connections, with concurrent connect-all and disconnect-all.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::keepalive;
use crate::config::{TransportKind, UpstreamConfig};
use crate::error::{ConnectFailures, McpError, ProxyError, RegistryError, UpstreamFailure};
use crate::mcp::McpClientInfo;
use crate::upstream::{ConnectionState, Upstream, create_connection};

/// Interval between keep-alive pings.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Point-in-time view of one upstream, for logging and inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamStats {
    pub name: String,
    pub kind: TransportKind,
    pub state: ConnectionState,
    pub needs_keepalive: bool,
    pub last_error: Option<String>,
}

/// A thread-safe registry of upstream connections, keyed by name.
///
/// The registry owns every connection's lifetime. Readers get copies of the
/// `Arc`s, never the map itself.
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<String, Arc<dyn Upstream>>>,
    keepalive_interval: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Add a connection. Fails if the name is taken.
    pub async fn add(&self, conn: Arc<dyn Upstream>) -> Result<(), RegistryError> {
        let mut connections = self.connections.write().await;
        let name = conn.name().to_string();
        if connections.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        debug!(upstream = %name, transport = %conn.kind(), "Registered upstream");
        connections.insert(name, conn);
        Ok(())
    }

    /// Build a connection from config and add it.
    pub async fn create_and_add(
        &self,
        name: &str,
        config: &UpstreamConfig,
    ) -> Result<Arc<dyn Upstream>, ProxyError> {
        let conn: Arc<dyn Upstream> = Arc::new(create_connection(name, config)?);
        self.add(conn.clone()).await?;
        Ok(conn)
    }

    /// Disconnect and remove a connection.
    ///
    /// The write lock is held across the disconnect so no reader can pick up
    /// a connection that is being torn down.
    pub async fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let mut connections = self.connections.write().await;
        let conn = connections
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        if let Err(e) = conn.disconnect().await {
            warn!(upstream = %name, error = %e, "Disconnect failed during remove");
        }
        connections.remove(name);
        Ok(())
    }

    /// Get a connection by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Upstream>> {
        let connections = self.connections.read().await;
        connections.get(name).cloned()
    }

    /// Every connection, ordered by name.
    pub async fn snapshot(&self) -> Vec<Arc<dyn Upstream>> {
        let connections = self.connections.read().await;
        connections.values().cloned().collect()
    }

    /// Connections currently in the Connected state.
    pub async fn connected(&self) -> Vec<Arc<dyn Upstream>> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|c| c.state() == ConnectionState::Connected)
            .collect()
    }

    /// All connection names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let connections = self.connections.read().await;
        connections.keys().cloned().collect()
    }

    pub async fn stats(&self) -> Vec<UpstreamStats> {
        self.snapshot()
            .await
            .iter()
            .map(|c| UpstreamStats {
                name: c.name().to_string(),
                kind: c.kind(),
                state: c.state(),
                needs_keepalive: c.needs_keepalive(),
                last_error: c.last_error(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Connect every registered upstream concurrently.
    ///
    /// One failure never cancels its siblings. When any fail, every failure
    /// is returned in completion order; the first is the summary. Connections
    /// that succeed and want pings get a keep-alive loop bound to `cancel`.
    pub async fn connect_all(
        &self,
        identity: &McpClientInfo,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        let mut tasks = JoinSet::new();
        for conn in self.snapshot().await {
            let identity = identity.clone();
            let cancel = cancel.clone();
            let interval = self.keepalive_interval;
            tasks.spawn(async move {
                let name = conn.name().to_string();
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(McpError::Connection("connect cancelled".into())),
                    result = conn.connect(&identity) => result,
                };
                if result.is_ok() && conn.needs_keepalive() {
                    tokio::spawn(keepalive::run(conn.clone(), interval, cancel));
                }
                (name, result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!(upstream = %name, "Connected upstream"),
                Ok((name, Err(error))) => {
                    error!(upstream = %name, error = %error, "Failed to connect upstream");
                    failures.push(UpstreamFailure { name, error });
                }
                Err(e) => {
                    error!(error = %e, "Connect task aborted");
                    failures.push(UpstreamFailure {
                        name: "<unknown>".into(),
                        error: McpError::Connection(e.to_string()),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::ConnectFailed(ConnectFailures::new(failures)))
        }
    }

    /// Disconnect every registered upstream concurrently.
    ///
    /// Never fails: every disconnect is attempted and each failure is logged.
    pub async fn disconnect_all(&self) {
        let mut tasks = JoinSet::new();
        for conn in self.snapshot().await {
            tasks.spawn(async move {
                let name = conn.name().to_string();
                (name, conn.disconnect().await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(upstream = %name, "Disconnected upstream"),
                Ok((name, Err(e))) => {
                    error!(upstream = %name, error = %e, "Failed to disconnect upstream")
                }
                Err(e) => error!(error = %e, "Disconnect task aborted"),
            }
        }
    }
}
