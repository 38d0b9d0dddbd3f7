// ABOUTME: SSE transport for MCP communication plus a small incremental SSE parser.
// ABOUTME: GET opens the event stream, POST carries client->server messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Transport;
use super::pending::PendingReplies;
use crate::error::McpError;
use crate::mcp::{McpNotification, McpRequest, McpResponse};

const ENDPOINT_WAIT: Duration = Duration::from_secs(10);

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental parser for `text/event-stream` bodies.
///
/// Bytes may arrive split at arbitrary points; complete events are returned
/// as soon as their terminating blank line is seen.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Raw bytes after the last newline; may end inside a UTF-8 sequence.
    partial: Vec<u8>,
    buffer: String,
    event_type: String,
    event_data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw network bytes. Only whole lines are decoded, so a character
    /// split across chunks is reassembled before it is read.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.partial.extend_from_slice(chunk);
        let Some(last) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let lines: Vec<u8> = self.partial.drain(..=last).collect();
        self.feed(&String::from_utf8_lossy(&lines))
    }

    /// Feed a chunk and collect every event it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);

            if line.is_empty() {
                if !self.event_data.is_empty() || !self.event_type.is_empty() {
                    let event = if self.event_type.is_empty() {
                        "message".to_string()
                    } else {
                        std::mem::take(&mut self.event_type)
                    };
                    events.push(SseEvent {
                        event,
                        data: std::mem::take(&mut self.event_data),
                    });
                }
                self.event_type.clear();
            } else if line.starts_with(':') {
                // comment / keep-alive
            } else if let Some(value) = field(&line, "event") {
                self.event_type = value.to_string();
            } else if let Some(value) = field(&line, "data") {
                if !self.event_data.is_empty() {
                    self.event_data.push('\n');
                }
                self.event_data.push_str(value);
            }
        }
        events
    }
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Legacy SSE transport: a long-lived GET carries server messages, and the
/// server's `endpoint` event names the URL client messages are POSTed to.
pub struct SseTransport {
    upstream: String,
    stream_url: String,
    messages_url: String,
    http: reqwest::Client,
    headers: HashMap<String, String>,
    pending: Arc<PendingReplies>,
    stream: CancellationToken,
    timeout: Duration,
}

impl SseTransport {
    /// Open the event stream and wait for the server's `endpoint` event.
    pub async fn connect(
        upstream: &str,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let base = reqwest::Url::parse(url)
            .map_err(|e| McpError::Connection(format!("invalid SSE url {}: {}", url, e)))?;
        let http = reqwest::Client::new();

        let mut request = http.get(base.clone()).header("Accept", "text/event-stream");
        for (key, value) in headers {
            request = request.header(key, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| McpError::Connection(format!("SSE connect failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(McpError::Connection(format!(
                "SSE connect returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let pending = Arc::new(PendingReplies::new());
        let stream = CancellationToken::new();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        tokio::spawn(pump_events(
            upstream.to_string(),
            response,
            pending.clone(),
            endpoint_tx,
            stream.clone(),
        ));

        let announced = match tokio::time::timeout(ENDPOINT_WAIT, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                stream.cancel();
                return Err(McpError::Connection(
                    "SSE stream ended before the endpoint event".into(),
                ));
            }
            Err(_) => {
                stream.cancel();
                return Err(McpError::Connection(
                    "timed out waiting for the endpoint event".into(),
                ));
            }
        };
        // Relative endpoints resolve against the stream URL.
        let messages_url = base
            .join(&announced)
            .map_err(|e| McpError::Connection(format!("bad endpoint {}: {}", announced, e)))?;
        debug!(upstream = %upstream, endpoint = %messages_url, "SSE session established");

        Ok(Self {
            upstream: upstream.to_string(),
            stream_url: url.to_string(),
            messages_url: messages_url.to_string(),
            http,
            headers: headers.clone(),
            pending,
            stream,
            timeout,
        })
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    /// Where client messages are POSTed, as announced by the server.
    pub fn messages_url(&self) -> &str {
        &self.messages_url
    }

    async fn post(&self, body: String) -> Result<(), McpError> {
        let mut request = self
            .http
            .post(&self.messages_url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| McpError::Connection(format!("POST to {} failed: {}", self.upstream, e)))?;
        if !response.status().is_success() {
            return Err(McpError::Protocol(format!(
                "POST returned HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

async fn pump_events(
    upstream: String,
    response: reqwest::Response,
    pending: Arc<PendingReplies>,
    endpoint_tx: oneshot::Sender<String>,
    cancel: CancellationToken,
) {
    let mut body = response.bytes_stream();
    let mut parser = SseParser::new();
    let mut endpoint_tx = Some(endpoint_tx);

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = body.next() => chunk,
        };
        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!(upstream = %upstream, error = %e, "SSE stream failed");
                break;
            }
            None => {
                warn!(upstream = %upstream, "SSE stream closed by upstream");
                break;
            }
        };
        for event in parser.feed_bytes(&bytes) {
            match event.event.as_str() {
                "endpoint" => match endpoint_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(event.data);
                    }
                    None => debug!(upstream = %upstream, "Ignoring repeated endpoint event"),
                },
                "message" => pending.deliver(&upstream, &event.data),
                other => debug!(upstream = %upstream, event = %other, "Ignoring SSE event"),
            }
        }
    }
    pending.close();
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, McpError> {
        let id = request.id;
        let body = serde_json::to_string(&request)?;
        let rx = self.pending.register(id)?;
        if let Err(e) = self.post(body).await {
            self.pending.forget(id);
            return Err(e);
        }
        self.pending.wait(id, rx, self.timeout).await
    }

    async fn notify(&self, notification: McpNotification) -> Result<(), McpError> {
        self.post(serde_json::to_string(&notification)?).await
    }

    async fn shutdown(&self) -> Result<(), McpError> {
        self.stream.cancel();
        self.pending.close();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_handles_split_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed("event: endp").is_empty());
        assert!(parser.feed("oint\ndata: /messages?sessionId=1\r\n").is_empty());

        let events = parser.feed("\r\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "endpoint".into(),
                data: "/messages?sessionId=1".into(),
            }]
        );
    }

    #[test]
    fn test_parser_reassembles_character_split_across_chunks() {
        let encoded = "data: caf\u{e9} ol\u{e9}\n\n".as_bytes();
        let split = encoded.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut parser = SseParser::new();
        assert!(parser.feed_bytes(&encoded[..split]).is_empty());
        let events = parser.feed_bytes(&encoded[split..]);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "caf\u{e9} ol\u{e9}");
    }

    #[test]
    fn test_parser_defaults_to_message_and_joins_data() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: {\"a\":\ndata: 1}\n\n: keep-alive\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"a\":\n1}");
    }

    #[test]
    fn test_parser_multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: a\ndata: 1\n\nevent: b\ndata:2\n\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event, "b");
        assert_eq!(events[1].data, "2");
    }

    #[tokio::test]
    async fn test_connect_invalid_url() {
        let result = SseTransport::connect(
            "fetch",
            "http://localhost:99999/nonexistent",
            &HashMap::new(),
            Duration::from_secs(1),
        )
        .await;

        assert!(result.is_err());
    }
}
