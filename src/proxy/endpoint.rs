// ABOUTME: McpEndpoint - a locally owned MCP server that republishes a catalog.
// ABOUTME: Holds registered tools/prompts/resources and dispatches JSON-RPC requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{McpError, RegisterError};
use crate::mcp::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, IncomingMessage, METHOD_NOT_FOUND,
    McpClientInfo, McpPrompt, McpResource, McpResourceTemplate, McpRpcError, McpToolInfo,
    OutgoingResponse, PROTOCOL_VERSION,
};

/// Invoked with the `arguments` of a `tools/call` or `prompts/get`.
pub type CallHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, McpError>> + Send + Sync>;

/// Invoked with the URI of a `resources/read`.
pub type ReadHandler = Arc<dyn Fn(String) -> BoxFuture<'static, Result<Value, McpError>> + Send + Sync>;

#[derive(Default)]
struct Catalog {
    tools: BTreeMap<String, (McpToolInfo, CallHandler)>,
    prompts: BTreeMap<String, (McpPrompt, CallHandler)>,
    resources: BTreeMap<String, (McpResource, ReadHandler)>,
    templates: Vec<(McpResourceTemplate, ReadHandler)>,
}

/// A local MCP server endpoint.
pub struct McpEndpoint {
    info: McpClientInfo,
    catalog: RwLock<Catalog>,
}

type RpcResult = Result<Value, McpRpcError>;

impl McpEndpoint {
    /// Create an empty endpoint that introduces itself as `info`.
    pub fn new(info: McpClientInfo) -> Self {
        Self {
            info,
            catalog: RwLock::new(Catalog::default()),
        }
    }

    pub fn info(&self) -> &McpClientInfo {
        &self.info
    }

    /// A tool registered under a name already in use replaces the earlier
    /// entry; the last registration wins.
    pub fn register_tool(&self, tool: McpToolInfo, handler: CallHandler) -> Result<(), RegisterError> {
        if tool.name.is_empty() {
            return Err(RegisterError::EmptyName);
        }
        let key = tool.name.clone();
        let replaced = self.catalog.write().tools.insert(key.clone(), (tool, handler));
        if replaced.is_some() {
            warn!(tool = %key, "Tool registered twice, keeping the later definition");
        }
        Ok(())
    }

    pub fn register_prompt(&self, prompt: McpPrompt, handler: CallHandler) -> Result<(), RegisterError> {
        let mut catalog = self.catalog.write();
        let key = checked_key(&prompt.name, |k| catalog.prompts.contains_key(k))?;
        catalog.prompts.insert(key, (prompt, handler));
        Ok(())
    }

    pub fn register_resource(
        &self,
        resource: McpResource,
        handler: ReadHandler,
    ) -> Result<(), RegisterError> {
        let mut catalog = self.catalog.write();
        let key = checked_key(&resource.uri, |k| catalog.resources.contains_key(k))?;
        catalog.resources.insert(key, (resource, handler));
        Ok(())
    }

    pub fn register_resource_template(
        &self,
        template: McpResourceTemplate,
        handler: ReadHandler,
    ) -> Result<(), RegisterError> {
        let mut catalog = self.catalog.write();
        let key = checked_key(&template.uri_template, |k| {
            catalog.templates.iter().any(|(t, _)| t.uri_template == k)
        })?;
        debug!(template = %key, "Registered resource template");
        catalog.templates.push((template, handler));
        Ok(())
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.catalog.read().tools.keys().cloned().collect()
    }

    pub fn prompt_names(&self) -> Vec<String> {
        self.catalog.read().prompts.keys().cloned().collect()
    }

    pub fn resource_uris(&self) -> Vec<String> {
        self.catalog.read().resources.keys().cloned().collect()
    }

    pub fn template_uris(&self) -> Vec<String> {
        self.catalog
            .read()
            .templates
            .iter()
            .map(|(t, _)| t.uri_template.clone())
            .collect()
    }

    /// Handle a raw JSON-RPC payload, single or batch.
    ///
    /// Returns `None` when nothing needs to be sent back, i.e. the payload
    /// held only notifications or replies.
    pub async fn handle_payload(&self, payload: Value) -> Option<Value> {
        match payload {
            Value::Array(batch) => {
                if batch.is_empty() {
                    return Some(invalid_request("empty batch"));
                }
                let mut responses = Vec::new();
                for item in batch {
                    if let Some(response) = self.handle_value(item).await {
                        responses.push(response);
                    }
                }
                (!responses.is_empty()).then(|| Value::Array(responses))
            }
            single => self.handle_value(single).await,
        }
    }

    async fn handle_value(&self, value: Value) -> Option<Value> {
        // Replies from the client to server-initiated requests carry no method.
        if value.get("method").is_none()
            && (value.get("result").is_some() || value.get("error").is_some())
        {
            return None;
        }

        match serde_json::from_value::<IncomingMessage>(value) {
            Ok(message) => {
                let response = self.handle(message).await?;
                serde_json::to_value(response).ok()
            }
            Err(e) => Some(invalid_request(&e.to_string())),
        }
    }

    /// Dispatch one message. Notifications produce no response.
    pub async fn handle(&self, message: IncomingMessage) -> Option<OutgoingResponse> {
        if message.is_notification() {
            debug!(method = %message.method, "Received notification");
            return None;
        }

        let id = message.id.clone().unwrap_or(Value::Null);
        let params = message.params.unwrap_or(Value::Null);
        let result = match message.method.as_str() {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(&params).await,
            "prompts/list" => Ok(self.list_prompts()),
            "prompts/get" => self.get_prompt(&params).await,
            "resources/list" => Ok(self.list_resources()),
            "resources/read" => self.read_resource(&params).await,
            "resources/templates/list" => Ok(self.list_resource_templates()),
            other => Err(McpRpcError::new(
                METHOD_NOT_FOUND,
                format!("method not found: {}", other),
            )),
        };

        Some(match result {
            Ok(value) => OutgoingResponse::success(id, value),
            Err(error) => OutgoingResponse::failure(id, error),
        })
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "prompts": { "listChanged": false },
                "resources": { "subscribe": false, "listChanged": false },
            },
            "serverInfo": self.info,
        })
    }

    fn list_tools(&self) -> Value {
        let catalog = self.catalog.read();
        let tools: Vec<&McpToolInfo> = catalog.tools.values().map(|(t, _)| t).collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: &Value) -> RpcResult {
        let name = required_str(params, "name")?;
        let handler = self
            .catalog
            .read()
            .tools
            .get(name)
            .map(|(_, h)| h.clone())
            .ok_or_else(|| McpRpcError::new(INVALID_PARAMS, format!("tool not found: {}", name)))?;
        invoke(handler(params.get("arguments").cloned())).await
    }

    fn list_prompts(&self) -> Value {
        let catalog = self.catalog.read();
        let prompts: Vec<&McpPrompt> = catalog.prompts.values().map(|(p, _)| p).collect();
        json!({ "prompts": prompts })
    }

    async fn get_prompt(&self, params: &Value) -> RpcResult {
        let name = required_str(params, "name")?;
        let handler = self
            .catalog
            .read()
            .prompts
            .get(name)
            .map(|(_, h)| h.clone())
            .ok_or_else(|| {
                McpRpcError::new(INVALID_PARAMS, format!("prompt not found: {}", name))
            })?;
        invoke(handler(params.get("arguments").cloned())).await
    }

    fn list_resources(&self) -> Value {
        let catalog = self.catalog.read();
        let resources: Vec<&McpResource> = catalog.resources.values().map(|(r, _)| r).collect();
        json!({ "resources": resources })
    }

    async fn read_resource(&self, params: &Value) -> RpcResult {
        let uri = required_str(params, "uri")?;
        let handler = {
            let catalog = self.catalog.read();
            catalog
                .resources
                .get(uri)
                .map(|(_, h)| h.clone())
                .or_else(|| {
                    catalog
                        .templates
                        .iter()
                        .find(|(t, _)| template_matches(&t.uri_template, uri))
                        .map(|(_, h)| h.clone())
                })
        };
        let handler = handler.ok_or_else(|| {
            McpRpcError::new(INVALID_PARAMS, format!("resource not found: {}", uri))
        })?;
        invoke(handler(uri.to_string())).await
    }

    fn list_resource_templates(&self) -> Value {
        let catalog = self.catalog.read();
        let templates: Vec<&McpResourceTemplate> =
            catalog.templates.iter().map(|(t, _)| t).collect();
        json!({ "resourceTemplates": templates })
    }
}

fn checked_key(key: &str, taken: impl Fn(&str) -> bool) -> Result<String, RegisterError> {
    if key.is_empty() {
        return Err(RegisterError::EmptyName);
    }
    if taken(key) {
        return Err(RegisterError::Duplicate(key.to_string()));
    }
    Ok(key.to_string())
}

fn required_str<'a>(params: &'a Value, field: &str) -> Result<&'a str, McpRpcError> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| McpRpcError::new(INVALID_PARAMS, format!("missing '{}' parameter", field)))
}

async fn invoke(call: BoxFuture<'static, Result<Value, McpError>>) -> RpcResult {
    call.await
        .map_err(|e| McpRpcError::new(INTERNAL_ERROR, e.to_string()))
}

fn invalid_request(detail: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": Value::Null,
        "error": { "code": INVALID_REQUEST, "message": format!("invalid request: {}", detail) },
    })
}

/// Whether `uri` fits an RFC 6570-style `template`.
///
/// Only literal text is checked: it must appear in order, with the first
/// literal as a prefix and the last as a suffix. Placeholders match anything.
pub fn template_matches(template: &str, uri: &str) -> bool {
    let mut literals = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        literals.push(&rest[..open]);
        rest = &rest[open + close + 1..];
    }
    literals.push(rest);

    if literals.len() == 1 {
        return template == uri;
    }

    let Some(mut remaining) = uri.strip_prefix(literals[0]) else {
        return false;
    };
    let last = literals[literals.len() - 1];
    for literal in &literals[1..literals.len() - 1] {
        if literal.is_empty() {
            continue;
        }
        match remaining.find(literal) {
            Some(at) => remaining = &remaining[at + literal.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}
