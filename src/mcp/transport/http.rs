// ABOUTME: Streamable HTTP transport - one POST per message, reply in the response body.
// ABOUTME: Tracks the server-assigned session id and ends the session on shutdown.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

use super::{SseParser, Transport};
use crate::error::McpError;
use crate::mcp::{McpNotification, McpRequest, McpResponse};

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// The server may answer a POST with plain JSON or with an event-stream body
/// whose `message` events carry the reply.
pub struct HttpTransport {
    upstream: String,
    url: reqwest::Url,
    http: reqwest::Client,
    headers: HashMap<String, String>,
    session: Mutex<Option<String>>,
    timeout: Duration,
}

impl HttpTransport {
    /// Validate the URL and build the client. Nothing is sent until the first message.
    pub async fn connect(
        upstream: &str,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| McpError::Connection(format!("invalid url {}: {}", url, e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("mux-proxy/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| McpError::Connection(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            upstream: upstream.to_string(),
            url,
            http,
            headers: headers.clone(),
            session: Mutex::new(None),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.lock().clone()
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, self.url.clone());
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        if let Some(session) = self.session_id() {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder
    }

    async fn post(&self, body: String) -> Result<reqwest::Response, McpError> {
        let response = self
            .request(reqwest::Method::POST)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session.lock();
            if current.as_deref() != Some(session) {
                debug!(upstream = %self.upstream, session = %session, "Upstream assigned session");
                *current = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Protocol(format!(
                "HTTP {} - {}",
                status.as_u16(),
                body
            )));
        }
        Ok(response)
    }

    fn transport_error(&self, e: reqwest::Error) -> McpError {
        if e.is_timeout() {
            McpError::Timeout(self.timeout)
        } else {
            McpError::Connection(format!("request to {} failed: {}", self.upstream, e))
        }
    }
}

/// Pull the reply for `request_id` out of an event-stream body.
fn reply_from_event_stream(body: &str, request_id: u64) -> Result<McpResponse, McpError> {
    let mut parser = SseParser::new();
    let mut events = parser.feed(body);
    events.extend(parser.feed("\n\n"));

    events
        .into_iter()
        .filter(|e| e.event == "message")
        .filter_map(|e| serde_json::from_str::<McpResponse>(&e.data).ok())
        .find(|r| r.id == request_id && r.is_reply())
        .ok_or_else(|| {
            McpError::Protocol(format!("no reply to request {} in event stream", request_id))
        })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, McpError> {
        let id = request.id;
        let response = self.post(serde_json::to_string(&request)?).await?;

        let streamed = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if streamed {
            return reply_from_event_stream(&body, id);
        }
        let reply: McpResponse = serde_json::from_str(&body)
            .map_err(|e| McpError::Protocol(format!("invalid JSON-RPC reply: {}", e)))?;
        if reply.id != id {
            return Err(McpError::Protocol(format!(
                "reply id {} does not match request id {}",
                reply.id, id
            )));
        }
        Ok(reply)
    }

    async fn notify(&self, notification: McpNotification) -> Result<(), McpError> {
        self.post(serde_json::to_string(&notification)?).await?;
        Ok(())
    }

    /// Ask the server to drop the session, if one was assigned.
    async fn shutdown(&self) -> Result<(), McpError> {
        if self.session_id().is_none() {
            return Ok(());
        }
        if let Err(e) = self.request(reqwest::Method::DELETE).send().await {
            warn!(upstream = %self.upstream, error = %e, "Failed to end upstream session");
        }
        self.session.lock().take();
        Ok(())
    }
}
