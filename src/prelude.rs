// ABOUTME: Prelude module - convenient imports for embedding the proxy.
// ABOUTME: Use `use mux_proxy::prelude::*;` to get started quickly.

pub use crate::app::{Application, LifecycleState, StartupPolicy};
pub use crate::config::{
    Config, FrontendKind, OptionsConfig, ProxyConfig, ToolFilterConfig, TransportKind,
    UpstreamConfig,
};
pub use crate::error::{BindError, ConfigError, McpError, ProxyError, RegistryError};
pub use crate::mcp::{McpClientInfo, McpPrompt, McpResource, McpResourceTemplate, McpToolInfo, Page};
pub use crate::proxy::{McpEndpoint, ProxyUnit, ToolFilter};
pub use crate::registry::ConnectionRegistry;
pub use crate::server::{Frontend, RouteTable};
pub use crate::upstream::{ConnectionState, Upstream, UpstreamConnection};
