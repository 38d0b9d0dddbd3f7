// ABOUTME: Proxy module - per-upstream units that republish a capability catalog.
// ABOUTME: Contains the tool filter, the local MCP endpoint, and the bind/populate logic.

mod endpoint;
mod filter;
mod unit;

pub use endpoint::{CallHandler, McpEndpoint, ReadHandler, template_matches};
pub use filter::ToolFilter;
pub use unit::{PopulateSummary, ProxyUnit};
