// ABOUTME: UpstreamConnection - an Upstream backed by a real McpClient.
// ABOUTME: Tracks connection state and last error; the factory builds one from config.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ConnectionState, Upstream};
use crate::config::{TransportKind, UpstreamConfig};
use crate::error::{ConfigError, McpError};
use crate::mcp::{
    McpClient, McpClientInfo, McpPrompt, McpResource, McpResourceTemplate, McpServerConfig,
    McpToolInfo, McpTransport, Page,
};

struct Status {
    state: ConnectionState,
    client: Option<Arc<McpClient>>,
    last_error: Option<String>,
}

/// A named connection to one upstream MCP server.
pub struct UpstreamConnection {
    name: String,
    kind: TransportKind,
    server_config: McpServerConfig,
    status: RwLock<Status>,
    // Serializes connect/disconnect so state transitions never interleave.
    lifecycle: Mutex<()>,
}

/// Build a disconnected connection from an upstream's config.
pub fn create_connection(
    name: &str,
    config: &UpstreamConfig,
) -> Result<UpstreamConnection, ConfigError> {
    let kind = config.transport_kind()?;
    let transport = match kind {
        TransportKind::Stdio => {
            let command = config
                .command
                .clone()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("command is required for stdio upstream {}", name))
                })?;
            McpTransport::Stdio {
                command,
                args: config.args.clone(),
                env: config.env.clone(),
            }
        }
        TransportKind::Sse | TransportKind::StreamableHttp => {
            let url = config.url.clone().filter(|u| !u.is_empty()).ok_or_else(|| {
                ConfigError::Invalid(format!("url is required for {} upstream {}", kind, name))
            })?;
            let headers = config.headers.clone();
            if kind == TransportKind::Sse {
                McpTransport::Sse { url, headers }
            } else {
                McpTransport::Http { url, headers }
            }
        }
    };

    Ok(UpstreamConnection {
        name: name.to_string(),
        kind,
        server_config: McpServerConfig {
            name: name.to_string(),
            transport,
            timeout: config.request_timeout(),
        },
        status: RwLock::new(Status {
            state: ConnectionState::Disconnected,
            client: None,
            last_error: None,
        }),
        lifecycle: Mutex::new(()),
    })
}

impl UpstreamConnection {
    /// Move to Disconnected if the transport went away underneath us. The
    /// client is kept so a later disconnect still reaps it.
    fn notice_dropped_channel(&self) {
        let dropped = {
            let status = self.status.read();
            status.state == ConnectionState::Connected
                && status.client.as_ref().is_some_and(|c| c.is_closed())
        };
        if !dropped {
            return;
        }
        let mut status = self.status.write();
        if status.state == ConnectionState::Connected {
            status.state = ConnectionState::Disconnected;
            status.last_error = Some("upstream channel closed".into());
            drop(status);
            warn!(upstream = %self.name, "Upstream channel closed, marking disconnected");
        }
    }

    fn client(&self) -> Result<Arc<McpClient>, McpError> {
        self.notice_dropped_channel();
        let status = self.status.read();
        match (&status.state, &status.client) {
            (ConnectionState::Connected, Some(client)) => Ok(client.clone()),
            _ => Err(McpError::NotConnected(self.name.clone())),
        }
    }

    fn record_error(&self, error: &McpError) {
        self.status.write().last_error = Some(error.to_string());
    }
}

#[async_trait]
impl Upstream for UpstreamConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn needs_keepalive(&self) -> bool {
        !matches!(self.kind, TransportKind::Stdio)
    }

    fn state(&self) -> ConnectionState {
        self.notice_dropped_channel();
        self.status.read().state
    }

    fn last_error(&self) -> Option<String> {
        self.status.read().last_error.clone()
    }

    async fn connect(&self, identity: &McpClientInfo) -> Result<(), McpError> {
        let _guard = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        let stale = {
            let mut status = self.status.write();
            status.state = ConnectionState::Connecting;
            status.client.take()
        };
        if let Some(stale) = stale {
            let _ = stale.shutdown().await;
        }

        let connected = async {
            let mut client = McpClient::connect(self.server_config.clone()).await?;
            if let Err(e) = client.initialize(identity).await {
                let _ = client.shutdown().await;
                return Err(e);
            }
            Ok::<_, McpError>(client)
        }
        .await;

        let mut status = self.status.write();
        match connected {
            Ok(client) => {
                status.state = ConnectionState::Connected;
                status.client = Some(Arc::new(client));
                status.last_error = None;
                drop(status);
                info!(upstream = %self.name, transport = %self.kind, "Initialized MCP client");
                Ok(())
            }
            Err(e) => {
                status.state = ConnectionState::Disconnected;
                status.client = None;
                status.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        let _guard = self.lifecycle.lock().await;
        let client = {
            let mut status = self.status.write();
            status.state = ConnectionState::Disconnected;
            status.client.take()
        };

        match client {
            Some(client) => {
                debug!(upstream = %self.name, "Shutting down MCP client");
                client.shutdown().await
            }
            None => Ok(()),
        }
    }

    async fn health_check(&self) -> Result<(), McpError> {
        let result = self.client()?.ping().await;
        if let Err(e) = &result {
            self.record_error(e);
        }
        result
    }

    async fn list_tools(&self, cursor: Option<&str>) -> Result<Page<McpToolInfo>, McpError> {
        self.client()?.list_tools(cursor).await
    }

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, McpError> {
        self.client()?.call_tool(name, arguments).await
    }

    async fn list_prompts(&self, cursor: Option<&str>) -> Result<Page<McpPrompt>, McpError> {
        self.client()?.list_prompts(cursor).await
    }

    async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<Value, McpError> {
        self.client()?.get_prompt(name, arguments).await
    }

    async fn list_resources(&self, cursor: Option<&str>) -> Result<Page<McpResource>, McpError> {
        self.client()?.list_resources(cursor).await
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.client()?.read_resource(uri).await
    }

    async fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<McpResourceTemplate>, McpError> {
        self.client()?.list_resource_templates(cursor).await
    }
}
