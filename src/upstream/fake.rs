// ABOUTME: In-memory Upstream used by unit tests across the crate.
// ABOUTME: Serves scripted catalog pages and counts every list call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::{ConnectionState, Upstream};
use crate::config::TransportKind;
use crate::error::McpError;
use crate::mcp::{McpClientInfo, McpPrompt, McpResource, McpResourceTemplate, McpToolInfo, Page};

/// Pages are addressed by cursor: no cursor is page 0, `"c<N>"` is page N.
pub struct FakeUpstream {
    name: String,
    kind: TransportKind,
    state: Mutex<ConnectionState>,
    last_error: Mutex<Option<String>>,
    pub fail_connect: bool,
    pub fail_disconnect: bool,
    pub fail_tools: bool,
    pub fail_prompts: bool,
    pub tool_pages: Vec<Page<McpToolInfo>>,
    pub prompt_pages: Vec<Page<McpPrompt>>,
    pub resource_pages: Vec<Page<McpResource>>,
    pub template_pages: Vec<Page<McpResourceTemplate>>,
    pub calls: Mutex<HashMap<&'static str, usize>>,
    pub pings: AtomicUsize,
    /// How long each health check takes to answer.
    pub ping_delay: Duration,
}

impl FakeUpstream {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TransportKind::Stdio,
            state: Mutex::new(ConnectionState::Disconnected),
            last_error: Mutex::new(None),
            fail_connect: false,
            fail_disconnect: false,
            fail_tools: false,
            fail_prompts: false,
            tool_pages: vec![],
            prompt_pages: vec![],
            resource_pages: vec![],
            template_pages: vec![],
            calls: Mutex::new(HashMap::new()),
            pings: AtomicUsize::new(0),
            ping_delay: Duration::ZERO,
        }
    }

    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_tools(mut self, names: &[&str]) -> Self {
        let tools = names.iter().map(|n| McpToolInfo::new(*n, "")).collect();
        self.tool_pages = vec![Page::last(tools)];
        self
    }

    pub fn connected(self) -> Self {
        *self.state.lock() = ConnectionState::Connected;
        self
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    fn record(&self, method: &'static str) {
        *self.calls.lock().entry(method).or_default() += 1;
    }

    fn ensure_connected(&self) -> Result<(), McpError> {
        if *self.state.lock() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(McpError::NotConnected(self.name.clone()))
        }
    }

    fn page<T: Clone>(pages: &[Page<T>], cursor: Option<&str>) -> Page<T> {
        let index = cursor
            .and_then(|c| c.strip_prefix('c'))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        pages
            .get(index)
            .map(|p| Page::new(p.items.clone(), p.next_cursor.clone()))
            .unwrap_or_else(|| Page::last(vec![]))
    }
}

/// Tool pages whose sizes follow `sizes`. A page carries a cursor only when
/// the page after it has items, as a well-behaved server would.
pub fn linked_tool_pages(sizes: &[usize]) -> Vec<Page<McpToolInfo>> {
    let mut counter = 0;
    sizes
        .iter()
        .enumerate()
        .map(|(i, size)| {
            let items = (0..*size)
                .map(|_| {
                    counter += 1;
                    McpToolInfo::new(format!("tool_{}", counter), "")
                })
                .collect();
            let next = sizes
                .get(i + 1)
                .is_some_and(|s| *s > 0)
                .then(|| format!("c{}", i + 1));
            Page::new(items, next)
        })
        .collect()
}

#[async_trait]
impl Upstream for FakeUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn needs_keepalive(&self) -> bool {
        self.kind != TransportKind::Stdio
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    async fn connect(&self, _identity: &McpClientInfo) -> Result<(), McpError> {
        self.record("connect");
        tokio::task::yield_now().await;
        if self.fail_connect {
            let error = McpError::Connection(format!("{} refused", self.name));
            *self.last_error.lock() = Some(error.to_string());
            return Err(error);
        }
        *self.state.lock() = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        self.record("disconnect");
        *self.state.lock() = ConnectionState::Disconnected;
        if self.fail_disconnect {
            return Err(McpError::Connection(format!("{} hung up badly", self.name)));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), McpError> {
        self.ensure_connected()?;
        self.pings.fetch_add(1, Ordering::SeqCst);
        if !self.ping_delay.is_zero() {
            tokio::time::sleep(self.ping_delay).await;
        }
        Ok(())
    }

    async fn list_tools(&self, cursor: Option<&str>) -> Result<Page<McpToolInfo>, McpError> {
        self.ensure_connected()?;
        self.record("tools/list");
        if self.fail_tools {
            return Err(McpError::Rpc {
                code: -32603,
                message: "tools unavailable".into(),
            });
        }
        Ok(Self::page(&self.tool_pages, cursor))
    }

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, McpError> {
        self.ensure_connected()?;
        self.record("tools/call");
        if name == "explode" {
            return Err(McpError::Protocol("tool exploded".into()));
        }
        Ok(json!({
            "content": [{"type": "text", "text": format!("{} via {}", name, self.name)}],
            "arguments": arguments,
        }))
    }

    async fn list_prompts(&self, cursor: Option<&str>) -> Result<Page<McpPrompt>, McpError> {
        self.ensure_connected()?;
        self.record("prompts/list");
        if self.fail_prompts {
            return Err(McpError::Protocol("prompts unavailable".into()));
        }
        Ok(Self::page(&self.prompt_pages, cursor))
    }

    async fn get_prompt(&self, name: &str, _arguments: Option<Value>) -> Result<Value, McpError> {
        self.ensure_connected()?;
        self.record("prompts/get");
        Ok(json!({
            "messages": [{"role": "user", "content": {"type": "text", "text": name}}]
        }))
    }

    async fn list_resources(&self, cursor: Option<&str>) -> Result<Page<McpResource>, McpError> {
        self.ensure_connected()?;
        self.record("resources/list");
        Ok(Self::page(&self.resource_pages, cursor))
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.ensure_connected()?;
        self.record("resources/read");
        Ok(json!({"contents": [{"uri": uri, "text": "body"}]}))
    }

    async fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<McpResourceTemplate>, McpError> {
        self.ensure_connected()?;
        self.record("resources/templates/list");
        Ok(Self::page(&self.template_pages, cursor))
    }
}
