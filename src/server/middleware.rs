// ABOUTME: Per-route middleware: panic recovery, request logging, bearer auth.
// ABOUTME: The chain is derived from route options; disabled layers are left out entirely.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::config::OptionsConfig;

/// One layer of a route's middleware chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareKind {
    Recovery,
    Logging,
    Auth,
}

/// The layers a route gets, outermost first.
///
/// Recovery is always present. Logging appears only when enabled and auth
/// only when at least one token is configured.
pub fn middleware_chain(options: &OptionsConfig) -> Vec<MiddlewareKind> {
    let mut chain = vec![MiddlewareKind::Recovery];
    if options.log_enabled() {
        chain.push(MiddlewareKind::Logging);
    }
    if !options.tokens().is_empty() {
        chain.push(MiddlewareKind::Auth);
    }
    chain
}

#[derive(Clone)]
struct RouteContext {
    upstream: Arc<str>,
    tokens: Arc<[String]>,
}

/// Wrap `router` in the chain for `options`.
///
/// Layers are applied innermost first, so the first entry of the chain
/// ends up outermost and sees every request and response.
pub fn apply_middleware(router: Router, upstream: &str, options: &OptionsConfig) -> Router {
    let ctx = RouteContext {
        upstream: Arc::from(upstream),
        tokens: Arc::from(options.tokens()),
    };

    middleware_chain(options)
        .into_iter()
        .rev()
        .fold(router, |router, kind| match kind {
            MiddlewareKind::Recovery => {
                router.layer(middleware::from_fn_with_state(ctx.clone(), recover))
            }
            MiddlewareKind::Logging => {
                router.layer(middleware::from_fn_with_state(ctx.clone(), log_request))
            }
            MiddlewareKind::Auth => {
                router.layer(middleware::from_fn_with_state(ctx.clone(), authorize))
            }
        })
}

async fn recover(State(ctx): State<RouteContext>, request: Request, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            error!(
                upstream = %ctx.upstream,
                panic = %panic_message(panic.as_ref()),
                "Recovered from panic in handler"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

pub(super) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn log_request(State(ctx): State<RouteContext>, request: Request, next: Next) -> Response {
    info!(
        upstream = %ctx.upstream,
        method = %request.method(),
        path = %request.uri().path(),
        "Handling request"
    );
    let response = next.run(request).await;
    info!(
        upstream = %ctx.upstream,
        status = response.status().as_u16(),
        "Request completed"
    );
    response
}

async fn authorize(State(ctx): State<RouteContext>, request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| ctx.tokens.iter().any(|t| t == token));

    if !authorized {
        warn!(upstream = %ctx.upstream, "Rejected unauthorized request");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(request).await
}
