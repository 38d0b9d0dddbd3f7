// ABOUTME: RouteTable - maps normalized path prefixes to composed per-upstream routers.
// ABOUTME: Written during startup, then composed into the single server router.

use std::collections::BTreeMap;

use axum::Router;
use tokio::sync::RwLock;

use crate::error::ProxyError;

/// Join `base_path` and `name` into a prefix with one leading and one
/// trailing slash, e.g. `("api", "github")` gives `/api/github/`.
pub fn route_prefix(base_path: &str, name: &str) -> String {
    let joined = format!("{}/{}", base_path.trim_matches('/'), name.trim_matches('/'));
    let trimmed = joined.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

/// Prefix to router mapping shared by the concurrent route builders.
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<BTreeMap<String, Router>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `router` at `prefix`. Each prefix can be mounted once.
    pub async fn insert(&self, prefix: String, router: Router) -> Result<(), ProxyError> {
        if prefix == "/" {
            return Err(ProxyError::RouteBuild {
                name: prefix,
                message: "cannot mount a route at the root".into(),
            });
        }
        let mut routes = self.routes.write().await;
        if routes.contains_key(&prefix) {
            return Err(ProxyError::RouteBuild {
                name: prefix,
                message: "prefix is already mounted".into(),
            });
        }
        routes.insert(prefix, router);
        Ok(())
    }

    pub async fn contains(&self, prefix: &str) -> bool {
        let routes = self.routes.read().await;
        routes.contains_key(prefix)
    }

    /// Mounted prefixes, sorted.
    pub async fn prefixes(&self) -> Vec<String> {
        let routes = self.routes.read().await;
        routes.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        let routes = self.routes.read().await;
        routes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Nest every route under its prefix in one router.
    pub async fn compose(&self) -> Router {
        let routes = self.routes.read().await;
        routes.iter().fold(Router::new(), |app, (prefix, router)| {
            app.nest_service(prefix.trim_end_matches('/'), router.clone())
        })
    }
}
