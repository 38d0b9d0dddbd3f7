// ABOUTME: Server module - turns proxy units into HTTP routes on one listener.
// ABOUTME: Frontend framings, the per-route middleware chain, and the route table.

mod middleware;
mod routes;
mod sse;
mod streamable;

pub use middleware::{MiddlewareKind, apply_middleware, middleware_chain};
pub use routes::{RouteTable, route_prefix};

use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::config::FrontendKind;
use crate::proxy::McpEndpoint;

/// Builds the protocol-facing router for each upstream.
#[derive(Debug, Clone)]
pub struct Frontend {
    kind: FrontendKind,
    base_url: String,
    shutdown: CancellationToken,
}

impl Frontend {
    /// `base_url` is the externally visible proxy URL; SSE sessions
    /// advertise their message endpoint relative to it.
    pub fn new(kind: FrontendKind, base_url: impl Into<String>, shutdown: CancellationToken) -> Self {
        Self {
            kind,
            base_url: base_url.into(),
            shutdown,
        }
    }

    pub fn kind(&self) -> FrontendKind {
        self.kind
    }

    /// The bare router for `name`, without middleware.
    pub fn router(&self, name: &str, endpoint: Arc<McpEndpoint>) -> Router {
        match self.kind {
            FrontendKind::StreamableHttp => streamable::router(endpoint),
            FrontendKind::Sse => {
                let message_url = format!(
                    "{}/{}/message",
                    self.base_url.trim_end_matches('/'),
                    name
                );
                sse::router(name, endpoint, message_url, self.shutdown.clone())
            }
        }
    }
}

#[cfg(test)]
mod routes_test;
