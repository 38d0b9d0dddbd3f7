// ABOUTME: Tests for route prefixes, the route table, and composed routing.
// ABOUTME: Requests go through the composed router with tower's oneshot.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use super::*;
use crate::config::{FrontendKind, OptionsConfig};
use crate::error::ProxyError;
use crate::mcp::McpClientInfo;
use crate::proxy::McpEndpoint;

fn endpoint() -> Arc<McpEndpoint> {
    Arc::new(McpEndpoint::new(McpClientInfo::new("mux-proxy", "test")))
}

#[test]
fn test_prefix_normalization() {
    assert_eq!(route_prefix("api", "github"), "/api/github/");
    assert_eq!(route_prefix("/api/", "github"), "/api/github/");
    assert_eq!(route_prefix("/api", "/github/"), "/api/github/");
    assert_eq!(route_prefix("", "github"), "/github/");
    assert_eq!(route_prefix("/", "github"), "/github/");
    assert_eq!(route_prefix("/v1/mcp/", "fs"), "/v1/mcp/fs/");
}

#[tokio::test]
async fn test_insert_rejects_duplicates_and_root() {
    let table = RouteTable::new();
    table
        .insert("/api/github/".into(), axum::Router::new())
        .await
        .unwrap();

    assert!(matches!(
        table.insert("/api/github/".into(), axum::Router::new()).await,
        Err(ProxyError::RouteBuild { .. })
    ));
    assert!(table.insert("/".into(), axum::Router::new()).await.is_err());
    assert_eq!(table.prefixes().await, vec!["/api/github/".to_string()]);
    assert!(table.contains("/api/github/").await);
}

#[tokio::test]
async fn test_composed_routes_dispatch_by_prefix() {
    let frontend = Frontend::new(
        FrontendKind::StreamableHttp,
        "http://localhost:9090/api",
        CancellationToken::new(),
    );
    let table = RouteTable::new();
    for name in ["github", "fs"] {
        let router = frontend.router(name, endpoint());
        let router = apply_middleware(router, name, &OptionsConfig::default());
        table.insert(route_prefix("/api/", name), router).await.unwrap();
    }
    let app = table.compose().await;

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/github/")
                .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["id"], 1);

    let missing = app
        .oneshot(
            Request::post("/api/gitlab/")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sse_frontend_mounts_sse_and_message() {
    let frontend = Frontend::new(FrontendKind::Sse, "http://localhost:9090/", CancellationToken::new());
    let table = RouteTable::new();
    table
        .insert(route_prefix("/", "github"), frontend.router("github", endpoint()))
        .await
        .unwrap();
    let app = table.compose().await;

    let response = app
        .clone()
        .oneshot(Request::get("/github/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("http://localhost:9090/github/message?sessionId="));

    let no_session = app
        .oneshot(Request::post("/github/message").body(Body::from("{}")).unwrap())
        .await
        .unwrap();
    assert_eq!(no_session.status(), StatusCode::BAD_REQUEST);
}
