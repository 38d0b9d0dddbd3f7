// ABOUTME: Stateless streamable-HTTP framing: one JSON-RPC payload per POST.
// ABOUTME: Notification-only payloads get 202; anything but POST gets 405.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Value, json};

use crate::mcp::PARSE_ERROR;
use crate::proxy::McpEndpoint;

pub(crate) fn router(endpoint: Arc<McpEndpoint>) -> Router {
    Router::new().fallback(handle).with_state(endpoint)
}

async fn handle(State(endpoint): State<Arc<McpEndpoint>>, method: Method, body: Bytes) -> Response {
    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return parse_error(&e).into_response(),
    };

    match endpoint.handle_payload(payload).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

pub(crate) fn parse_error(error: &serde_json::Error) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "jsonrpc": "2.0",
            "id": Value::Null,
            "error": { "code": PARSE_ERROR, "message": format!("parse error: {}", error) },
        })),
    )
}
