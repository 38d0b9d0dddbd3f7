// ABOUTME: Upstream module - the uniform capability surface over upstream MCP servers.
// ABOUTME: Defines the Upstream trait, the concrete connection, and its factory.

mod connection;
#[cfg(test)]
pub(crate) mod fake;

pub use connection::{UpstreamConnection, create_connection};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::TransportKind;
use crate::error::McpError;
use crate::mcp::{McpClientInfo, McpPrompt, McpResource, McpResourceTemplate, McpToolInfo, Page};

/// Lifecycle of a single upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Capability surface every upstream exposes, whatever its transport.
///
/// Catalog and health operations fail with [`McpError::NotConnected`] before
/// a successful `connect` or after `disconnect`. Keep-alive scheduling is the
/// registry's job; an upstream only reports whether it wants pings.
#[async_trait]
pub trait Upstream: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> TransportKind;

    /// Whether the registry should ping this upstream periodically.
    fn needs_keepalive(&self) -> bool;

    fn state(&self) -> ConnectionState;

    /// The most recent connect or health failure, if any.
    fn last_error(&self) -> Option<String>;

    /// Establish the transport and run the MCP handshake. Idempotent.
    async fn connect(&self, identity: &McpClientInfo) -> Result<(), McpError>;

    /// Tear down the transport. Idempotent.
    async fn disconnect(&self) -> Result<(), McpError>;

    async fn health_check(&self) -> Result<(), McpError>;

    async fn list_tools(&self, cursor: Option<&str>) -> Result<Page<McpToolInfo>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, McpError>;

    async fn list_prompts(&self, cursor: Option<&str>) -> Result<Page<McpPrompt>, McpError>;

    async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<Value, McpError>;

    async fn list_resources(&self, cursor: Option<&str>) -> Result<Page<McpResource>, McpError>;

    async fn read_resource(&self, uri: &str) -> Result<Value, McpError>;

    async fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<McpResourceTemplate>, McpError>;
}
