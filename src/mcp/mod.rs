// ABOUTME: MCP module - Model Context Protocol client and wire types.
// ABOUTME: Connects to MCP servers via stdio, SSE, or streamable HTTP.

mod client;
mod transport;
mod types;

pub use client::{McpClient, McpServerConfig, McpTransport};
pub use transport::{
    AnyTransport, HttpTransport, SseEvent, SseParser, SseTransport, StdioTransport, Transport,
};
pub use types::*;

#[cfg(test)]
mod types_test;
