// ABOUTME: Transport abstraction for MCP communication.
// ABOUTME: Re-exports Stdio, SSE, and HTTP transports and the closed set over them.

mod http;
mod pending;
mod sse;
mod stdio;

pub use http::HttpTransport;
pub use sse::{SseEvent, SseParser, SseTransport};
pub use stdio::StdioTransport;

use async_trait::async_trait;

use super::{McpNotification, McpRequest, McpResponse};
use crate::error::McpError;

/// Moves JSON-RPC messages to one upstream and correlates the replies.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait, bounded by the upstream timeout, for its reply.
    async fn send(&self, request: McpRequest) -> Result<McpResponse, McpError>;

    async fn notify(&self, notification: McpNotification) -> Result<(), McpError>;

    /// Release the channel. Safe to call more than once.
    async fn shutdown(&self) -> Result<(), McpError>;

    /// Whether the channel has gone away on its own, e.g. the process
    /// exited or the event stream ended.
    fn is_closed(&self) -> bool {
        false
    }
}

/// The three ways bytes can move between the proxy and an upstream.
pub enum AnyTransport {
    Stdio(StdioTransport),
    Sse(SseTransport),
    Http(HttpTransport),
}

#[async_trait]
impl Transport for AnyTransport {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, McpError> {
        match self {
            AnyTransport::Stdio(t) => t.send(request).await,
            AnyTransport::Sse(t) => t.send(request).await,
            AnyTransport::Http(t) => t.send(request).await,
        }
    }

    async fn notify(&self, notification: McpNotification) -> Result<(), McpError> {
        match self {
            AnyTransport::Stdio(t) => t.notify(notification).await,
            AnyTransport::Sse(t) => t.notify(notification).await,
            AnyTransport::Http(t) => t.notify(notification).await,
        }
    }

    async fn shutdown(&self) -> Result<(), McpError> {
        match self {
            AnyTransport::Stdio(t) => t.shutdown().await,
            AnyTransport::Sse(t) => t.shutdown().await,
            AnyTransport::Http(t) => t.shutdown().await,
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            AnyTransport::Stdio(t) => t.is_closed(),
            AnyTransport::Sse(t) => t.is_closed(),
            AnyTransport::Http(t) => t.is_closed(),
        }
    }
}
