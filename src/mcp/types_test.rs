// ABOUTME: Tests for MCP types - serialization, deserialization.
// ABOUTME: Verifies JSON format matches MCP protocol and unknown fields survive.

use super::*;

#[test]
fn test_request_serialization() {
    let req = McpRequest::new("tools/list", None);
    let json = serde_json::to_value(&req).unwrap();

    assert_eq!(json["jsonrpc"], "2.0");
    assert_eq!(json["method"], "tools/list");
    assert!(json["id"].as_u64().is_some());
    assert!(json.get("params").is_none());
}

#[test]
fn test_request_ids_increment() {
    let req1 = McpRequest::new("test1", None);
    let req2 = McpRequest::new("test2", None);

    assert!(req2.id > req1.id);
}

#[test]
fn test_response_deserialization_error() {
    let json = r#"{
        "jsonrpc": "2.0",
        "id": 1,
        "error": {
            "code": -32600,
            "message": "Invalid Request"
        }
    }"#;

    let resp: McpResponse = serde_json::from_str(json).unwrap();
    assert!(resp.result.is_none());
    assert!(resp.is_reply());
    assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);
}

#[test]
fn test_server_request_is_not_a_reply() {
    let json = r#"{"jsonrpc": "2.0", "id": 7, "method": "ping"}"#;
    let resp: McpResponse = serde_json::from_str(json).unwrap();
    assert!(!resp.is_reply());
}

#[test]
fn test_tool_info_keeps_unknown_fields() {
    let json = r#"{
        "name": "read_file",
        "description": "Read a file",
        "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}},
        "annotations": {"readOnlyHint": true}
    }"#;

    let info: McpToolInfo = serde_json::from_str(json).unwrap();
    assert_eq!(info.name, "read_file");
    assert_eq!(info.extra["annotations"]["readOnlyHint"], true);

    let back = serde_json::to_value(&info).unwrap();
    assert_eq!(back["annotations"]["readOnlyHint"], true);
    assert_eq!(back["inputSchema"]["properties"]["path"]["type"], "string");
}

#[test]
fn test_tool_info_defaults_schema() {
    let info: McpToolInfo = serde_json::from_str(r#"{"name": "noop"}"#).unwrap();
    assert_eq!(info.input_schema["type"], "object");
    assert!(info.description.is_empty());
}

#[test]
fn test_list_result_cursor() {
    let json = r#"{"tools": [{"name": "a"}], "nextCursor": "page-2"}"#;
    let result: McpToolsListResult = serde_json::from_str(json).unwrap();
    let page: Page<McpToolInfo> = result.into();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.continuation(), Some("page-2"));
}

#[test]
fn test_empty_cursor_is_last_page() {
    let page: Page<McpPrompt> = Page::new(vec![], Some(String::new()));
    assert_eq!(page.continuation(), None);
}

#[test]
fn test_resource_templates_field_name() {
    let json = r#"{"resourceTemplates": [{"uriTemplate": "file:///{path}", "name": "file"}]}"#;
    let result: McpResourceTemplatesListResult = serde_json::from_str(json).unwrap();
    assert_eq!(result.resource_templates[0].uri_template, "file:///{path}");
    assert!(result.next_cursor.is_none());
}

#[test]
fn test_incoming_notification() {
    let json = r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#;
    let msg: IncomingMessage = serde_json::from_str(json).unwrap();
    assert!(msg.is_notification());
}

#[test]
fn test_incoming_string_id() {
    let json = r#"{"jsonrpc": "2.0", "id": "abc", "method": "ping"}"#;
    let msg: IncomingMessage = serde_json::from_str(json).unwrap();
    assert_eq!(msg.id, Some(serde_json::json!("abc")));
}

#[test]
fn test_initialize_params_serialization() {
    let params = McpInitializeParams {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: serde_json::json!({}),
        client_info: McpClientInfo::new("mux-proxy", "0.1.0"),
    };

    let json = serde_json::to_value(&params).unwrap();
    assert_eq!(json["protocolVersion"], "2024-11-05");
    assert_eq!(json["clientInfo"]["name"], "mux-proxy");
}
