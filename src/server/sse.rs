// ABOUTME: Legacy SSE framing: a GET event stream plus POSTed messages per session.
// ABOUTME: Responses are pushed to the session's stream as `message` events.

use std::collections::HashMap;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::{FutureExt, Stream};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::middleware::panic_message;
use super::streamable::parse_error;
use crate::mcp::{INTERNAL_ERROR, McpRpcError, OutgoingResponse};
use crate::proxy::McpEndpoint;

type Sessions = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Value>>>>;

#[derive(Clone)]
struct SseState {
    upstream: Arc<str>,
    endpoint: Arc<McpEndpoint>,
    sessions: Sessions,
    message_url: String,
    shutdown: CancellationToken,
}

pub(crate) fn router(
    upstream: &str,
    endpoint: Arc<McpEndpoint>,
    message_url: String,
    shutdown: CancellationToken,
) -> Router {
    let state = SseState {
        upstream: Arc::from(upstream),
        endpoint,
        sessions: Arc::new(RwLock::new(HashMap::new())),
        message_url,
        shutdown,
    };
    Router::new()
        .route("/sse", get(open_stream))
        .route("/message", post(post_message))
        .with_state(state)
}

/// Removes its session when the event stream is dropped.
struct SessionGuard {
    id: String,
    sessions: Sessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.write().remove(&self.id);
        debug!(session = %self.id, "SSE session closed");
    }
}

async fn open_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    state.sessions.write().insert(id.clone(), tx);
    debug!(session = %id, "SSE session opened");

    let endpoint_url = format!("{}?sessionId={}", state.message_url, id);
    let guard = SessionGuard {
        id,
        sessions: state.sessions.clone(),
    };
    let shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(Event::default().event("endpoint").data(endpoint_url));

        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = rx.recv() => message,
            };
            let Some(message) = message else { break };
            match serde_json::to_string(&message) {
                Ok(data) => yield Ok(Event::default().event("message").data(data)),
                Err(e) => warn!(error = %e, "Failed to encode SSE message"),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    let Some(session_id) = query.session_id.filter(|s| !s.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing sessionId").into_response();
    };
    let Some(sender) = state.sessions.read().get(&session_id).cloned() else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return parse_error(&e).into_response(),
    };

    // The reply travels over the event stream, so the handler runs after
    // this request has returned and outside the route's recovery layer.
    let endpoint = state.endpoint.clone();
    let upstream = state.upstream.clone();
    tokio::spawn(async move {
        let request_id = match &payload {
            Value::Array(_) => Some(Value::Null),
            single => single.get("id").cloned(),
        };
        let response = match AssertUnwindSafe(endpoint.handle_payload(payload))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(panic) => {
                error!(
                    upstream = %upstream,
                    session = %session_id,
                    panic = %panic_message(panic.as_ref()),
                    "Recovered from panic in handler"
                );
                panic_reply(request_id)
            }
        };
        if let Some(response) = response {
            if sender.send(response).is_err() {
                debug!(session = %session_id, "SSE session gone before response was sent");
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}

/// The reply owed after a handler panicked. Notifications get none.
fn panic_reply(request_id: Option<Value>) -> Option<Value> {
    let id = request_id?;
    let failure = OutgoingResponse::failure(
        id,
        McpRpcError::new(INTERNAL_ERROR, "internal error while handling request"),
    );
    serde_json::to_value(failure).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::mcp::McpClientInfo;

    fn app(shutdown: CancellationToken) -> Router {
        let endpoint = Arc::new(McpEndpoint::new(McpClientInfo::new("mux-proxy", "test")));
        router(
            "github",
            endpoint,
            "http://localhost:9090/github/message".into(),
            shutdown,
        )
    }

    async fn next_chunk(body: &mut Body) -> String {
        loop {
            let frame = body.frame().await.unwrap().unwrap();
            if let Ok(data) = frame.into_data() {
                let text = String::from_utf8(data.to_vec()).unwrap();
                if !text.starts_with(':') {
                    return text;
                }
            }
        }
    }

    fn session_id(chunk: &str) -> String {
        chunk
            .split("sessionId=")
            .nth(1)
            .unwrap()
            .lines()
            .next()
            .unwrap()
            .trim()
            .to_string()
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let app = app(CancellationToken::new());
        let response = app
            .clone()
            .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut body = response.into_body();

        let first = next_chunk(&mut body).await;
        assert!(first.contains("event: endpoint"));
        assert!(first.contains("http://localhost:9090/github/message?sessionId="));
        let id = session_id(&first);

        let posted = app
            .oneshot(
                Request::post(format!("/message?sessionId={}", id))
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(posted.status(), StatusCode::ACCEPTED);

        let pushed = next_chunk(&mut body).await;
        assert!(pushed.contains("event: message"));
        assert!(pushed.contains(r#""id":3"#));
    }

    #[tokio::test]
    async fn test_missing_and_unknown_sessions() {
        let app = app(CancellationToken::new());

        let missing = app
            .clone()
            .oneshot(Request::post("/message").body(Body::from("{}")).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let unknown = app
            .oneshot(
                Request::post("/message?sessionId=nope")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown_and_session_is_dropped() {
        let shutdown = CancellationToken::new();
        let app = app(shutdown.clone());
        let response = app
            .clone()
            .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let mut body = response.into_body();
        let id = session_id(&next_chunk(&mut body).await);

        shutdown.cancel();
        while let Some(frame) = body.frame().await {
            frame.unwrap();
        }
        drop(body);

        let posted = app
            .oneshot(
                Request::post(format!("/message?sessionId={}", id))
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(posted.status(), StatusCode::NOT_FOUND);
    }
}
