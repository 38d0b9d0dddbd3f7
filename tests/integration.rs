// ABOUTME: Integration tests running the whole proxy against in-process upstreams.
// ABOUTME: Four healthy stubs plus one real connection whose command does not exist.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use mux_proxy::prelude::*;

const HEALTHY: [&str; 4] = ["github", "fs", "fetch", "memory"];

/// Minimal upstream serving one page of tools that echo their caller.
struct StubUpstream {
    name: String,
    tools: Vec<McpToolInfo>,
    state: Mutex<ConnectionState>,
}

impl StubUpstream {
    fn new(name: &str, tools: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            tools: tools.iter().map(|t| McpToolInfo::new(*t, "")).collect(),
            state: Mutex::new(ConnectionState::Disconnected),
        })
    }

    fn check(&self) -> Result<(), McpError> {
        match *self.state.lock() {
            ConnectionState::Connected => Ok(()),
            _ => Err(McpError::NotConnected(self.name.clone())),
        }
    }
}

#[async_trait]
impl Upstream for StubUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    fn needs_keepalive(&self) -> bool {
        false
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn last_error(&self) -> Option<String> {
        None
    }

    async fn connect(&self, _identity: &McpClientInfo) -> Result<(), McpError> {
        *self.state.lock() = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        *self.state.lock() = ConnectionState::Disconnected;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), McpError> {
        self.check()
    }

    async fn list_tools(&self, _cursor: Option<&str>) -> Result<Page<McpToolInfo>, McpError> {
        self.check()?;
        Ok(Page::last(self.tools.clone()))
    }

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, McpError> {
        self.check()?;
        Ok(json!({
            "content": [{"type": "text", "text": format!("{} on {}", name, self.name)}],
            "isError": false,
            "arguments": arguments,
        }))
    }

    async fn list_prompts(&self, _cursor: Option<&str>) -> Result<Page<McpPrompt>, McpError> {
        self.check()?;
        Ok(Page::last(vec![]))
    }

    async fn get_prompt(&self, name: &str, _arguments: Option<Value>) -> Result<Value, McpError> {
        Err(McpError::Protocol(format!("no prompt {}", name)))
    }

    async fn list_resources(&self, _cursor: Option<&str>) -> Result<Page<McpResource>, McpError> {
        self.check()?;
        Ok(Page::last(vec![]))
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        Err(McpError::Protocol(format!("no resource {}", uri)))
    }

    async fn list_resource_templates(
        &self,
        _cursor: Option<&str>,
    ) -> Result<Page<McpResourceTemplate>, McpError> {
        self.check()?;
        Ok(Page::last(vec![]))
    }
}

fn config(panic_if_invalid: bool) -> Config {
    let text = json!({
        "proxy": {
            "baseURL": "http://127.0.0.1/mcp",
            "addr": "127.0.0.1:0",
            "name": "mux-proxy",
            "version": "integration",
            "type": "streamable-http",
            "shutdownTimeout": "2s",
            "options": {"authTokens": ["letmein"], "logEnabled": true}
        },
        "servers": {
            "invalid": {
                "command": "/nonexistent/mcp-server",
                "options": {"panicIfInvalid": panic_if_invalid}
            }
        }
    });
    mux_proxy::config::from_json(&text.to_string()).unwrap()
}

async fn stub_registry() -> (Arc<ConnectionRegistry>, Vec<Arc<StubUpstream>>) {
    let registry = Arc::new(ConnectionRegistry::new());
    let mut stubs = Vec::new();
    for name in HEALTHY {
        let stub = StubUpstream::new(name, &["echo"]);
        let conn: Arc<dyn Upstream> = stub.clone();
        registry.add(conn).await.unwrap();
        stubs.push(stub);
    }
    (registry, stubs)
}

fn rpc(method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params})
}

#[tokio::test]
async fn test_invalid_upstream_with_panic_flag_aborts() {
    let (registry, stubs) = stub_registry().await;
    let app = Application::with_registry(config(true), registry);

    let err = app.run(std::future::pending()).await.unwrap_err();
    assert!(err.to_string().contains("invalid"), "{}", err);
    assert_eq!(app.state(), LifecycleState::Stopped);
    assert!(app.local_addr().is_none());
    for stub in &stubs {
        assert_eq!(stub.state(), ConnectionState::Disconnected);
    }
}

#[tokio::test]
async fn test_partial_startup_serves_every_healthy_upstream() {
    let (registry, stubs) = stub_registry().await;
    let app = Arc::new(Application::with_registry(config(false), registry));
    let stop = CancellationToken::new();

    let runner = {
        let app = app.clone();
        let stop = stop.clone();
        tokio::spawn(async move { app.run(stop.cancelled_owned()).await })
    };
    let mut states = app.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == LifecycleState::Serving),
    )
    .await
    .expect("proxy never started serving")
    .unwrap();

    let routes = app.routes().prefixes().await;
    assert_eq!(routes.len(), 4);
    assert!(!routes.iter().any(|r| r.contains("invalid")));

    let addr = app.local_addr().unwrap();
    let client = reqwest::Client::new();
    for name in HEALTHY {
        let url = format!("http://{}/mcp/{}/", addr, name);

        let denied = client
            .post(&url)
            .json(&rpc("ping", json!({})))
            .send()
            .await
            .unwrap();
        assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

        let body: Value = client
            .post(&url)
            .bearer_auth("letmein")
            .json(&rpc("tools/call", json!({"name": "echo", "arguments": {"x": 1}})))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            body["result"]["content"][0]["text"],
            format!("echo on {}", name)
        );
    }

    stop.cancel();
    runner.await.unwrap().unwrap();
    assert_eq!(app.state(), LifecycleState::Stopped);
    for stub in &stubs {
        assert_eq!(stub.state(), ConnectionState::Disconnected);
    }
}

#[tokio::test]
async fn test_registry_connect_all_then_disconnect_all() {
    let (registry, stubs) = stub_registry().await;
    registry
        .create_and_add("invalid", &UpstreamConfig::stdio("/nonexistent/mcp-server", vec![]))
        .await
        .unwrap();

    let result = registry
        .connect_all(&McpClientInfo::new("mux-proxy", "integration"), &CancellationToken::new())
        .await;
    match result {
        Err(RegistryError::ConnectFailed(failures)) => {
            assert_eq!(failures.names(), vec!["invalid"]);
        }
        other => panic!("expected a connect failure, got {:?}", other),
    }
    assert_eq!(registry.connected().await.len(), 4);

    registry.disconnect_all().await;
    assert!(registry.connected().await.is_empty());
    assert!(stubs.iter().all(|s| s.state() == ConnectionState::Disconnected));
}
