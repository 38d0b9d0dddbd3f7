// ABOUTME: Registry module - owns the named set of upstream connections.
// ABOUTME: Concurrent bulk connect/disconnect plus keep-alive scheduling.

mod keepalive;
mod registry;

pub use registry::*;
