// ABOUTME: Root module for mux-proxy - one HTTP listener in front of many MCP servers.
// ABOUTME: Re-exports the lifecycle entry point and the error type.

pub mod app;
pub mod config;
pub mod error;
pub mod mcp;
pub mod prelude;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod upstream;

pub use app::{Application, LifecycleState, StartupPolicy};
pub use error::ProxyError;
