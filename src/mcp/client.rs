// ABOUTME: MCP client for one upstream server over stdio, SSE, or streamable HTTP.
// ABOUTME: Covers the handshake, ping, and the paginated catalog operations a proxy needs.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::transport::{AnyTransport, HttpTransport, SseTransport, StdioTransport, Transport};
use super::{
    McpClientInfo, McpInitializeParams, McpInitializeResult, McpNotification, McpPrompt,
    McpPromptsListResult, McpRequest, McpResource, McpResourceTemplate,
    McpResourceTemplatesListResult, McpResourcesListResult, McpServerCapabilities, McpToolInfo,
    McpToolsListResult, PROTOCOL_VERSION, Page,
};
use crate::error::McpError;

/// How bytes reach the upstream.
#[derive(Debug, Clone)]
pub enum McpTransport {
    /// Spawn a subprocess and speak over its stdin/stdout.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// Long-lived event stream plus POSTed messages.
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
    /// One POST per message.
    Http {
        url: String,
        headers: HashMap<String, String>,
    },
}

#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub name: String,
    pub transport: McpTransport,
    /// Per-request deadline.
    pub timeout: Duration,
}

pub struct McpClient {
    name: String,
    transport: AnyTransport,
    capabilities: McpServerCapabilities,
}

impl McpClient {
    /// Open the transport. The MCP handshake is a separate step, see [`McpClient::initialize`].
    pub async fn connect(config: McpServerConfig) -> Result<Self, McpError> {
        let (name, timeout) = (config.name.as_str(), config.timeout);
        let transport = match &config.transport {
            McpTransport::Stdio { command, args, env } => AnyTransport::Stdio(
                StdioTransport::connect(name, command, args, env, timeout).await?,
            ),
            McpTransport::Sse { url, headers } => {
                AnyTransport::Sse(SseTransport::connect(name, url, headers, timeout).await?)
            }
            McpTransport::Http { url, headers } => {
                AnyTransport::Http(HttpTransport::connect(name, url, headers, timeout).await?)
            }
        };

        Ok(Self {
            name: config.name,
            transport,
            capabilities: McpServerCapabilities::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the server advertised during initialize.
    pub fn capabilities(&self) -> &McpServerCapabilities {
        &self.capabilities
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let response = self.transport.send(McpRequest::new(method, params)).await?;
        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| McpError::Protocol(format!("{} reply carried no result", method)))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.transport
            .notify(McpNotification::new(method, params))
            .await
    }

    fn cursor_params(cursor: Option<&str>) -> Option<Value> {
        cursor
            .filter(|c| !c.is_empty())
            .map(|c| json!({ "cursor": c }))
    }

    /// Fetch one page of a catalog listing.
    async fn page<R, T>(&self, method: &str, cursor: Option<&str>) -> Result<Page<T>, McpError>
    where
        R: DeserializeOwned + Into<Page<T>>,
    {
        let result = self.request(method, Self::cursor_params(cursor)).await?;
        let page: Page<T> = serde_json::from_value::<R>(result)?.into();
        debug!(
            upstream = %self.name,
            method = %method,
            items = page.items.len(),
            more = page.continuation().is_some(),
            "Fetched catalog page"
        );
        Ok(page)
    }

    /// `tools/call` and `prompts/get` share a shape: a name plus optional arguments.
    async fn invoke(
        &self,
        method: &str,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, McpError> {
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.request(method, Some(params)).await
    }

    /// Run the handshake, identifying as `identity`.
    pub async fn initialize(
        &mut self,
        identity: &McpClientInfo,
    ) -> Result<McpInitializeResult, McpError> {
        let params = McpInitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: identity.clone(),
        };
        let result = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;
        let init: McpInitializeResult = serde_json::from_value(result)?;
        self.capabilities = init.capabilities.clone();
        self.notify("notifications/initialized", None).await?;

        debug!(
            upstream = %self.name,
            protocol = %init.protocol_version,
            server = ?init.server_info,
            "Upstream initialized"
        );
        Ok(init)
    }

    pub async fn shutdown(&self) -> Result<(), McpError> {
        self.transport.shutdown().await
    }

    /// Whether the transport has dropped without a shutdown being asked for.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        self.request("ping", None).await?;
        Ok(())
    }

    pub async fn list_tools(&self, cursor: Option<&str>) -> Result<Page<McpToolInfo>, McpError> {
        self.page::<McpToolsListResult, _>("tools/list", cursor).await
    }

    /// The raw result is returned so nothing is lost in transit.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, McpError> {
        self.invoke("tools/call", name, arguments).await
    }

    pub async fn list_prompts(&self, cursor: Option<&str>) -> Result<Page<McpPrompt>, McpError> {
        self.page::<McpPromptsListResult, _>("prompts/list", cursor).await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<Value, McpError> {
        self.invoke("prompts/get", name, arguments).await
    }

    pub async fn list_resources(&self, cursor: Option<&str>) -> Result<Page<McpResource>, McpError> {
        self.page::<McpResourcesListResult, _>("resources/list", cursor)
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.request("resources/read", Some(json!({ "uri": uri })))
            .await
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<McpResourceTemplate>, McpError> {
        self.page::<McpResourceTemplatesListResult, _>("resources/templates/list", cursor)
            .await
    }
}
