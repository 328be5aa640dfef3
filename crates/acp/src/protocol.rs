//! JSON-RPC frame types for the external-agent protocol.
//!
//! The wire format is newline-delimited JSON-RPC 2.0 over the agent
//! process's stdio. The channel is bidirectional: we issue requests
//! (`initialize`, `session/new`, `session/prompt`) and the agent issues
//! requests back (`fs/*`, `terminal/*`, `session/request_permission`)
//! plus `session/update` notifications while a prompt is in flight.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// An outgoing JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: next_id(),
            method: method.into(),
            params,
        }
    }
}

/// A response to a request we sent.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("method not found: {method}"),
            data: None,
        }
    }
}

/// An outgoing response to a request the agent sent us.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponseOut {
    pub jsonrpc: &'static str,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponseOut {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Classification of an incoming frame, by inspecting `id`/`method`.
#[derive(Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// A response to a request we sent (has `id`, no `method`)
    Response,
    /// A request from the agent (has `id` and `method`)
    IncomingRequest { id: u64 },
    /// A notification (has `method`, no `id`)
    Notification,
}

/// Pure frame classifier, called once per line in the reader loop.
pub fn classify_message(json: &serde_json::Value) -> MessageKind {
    let id = json.get("id").and_then(|v| v.as_u64());
    let method = json.get("method").and_then(|v| v.as_str());
    match (id, method) {
        (Some(id), Some(_)) => MessageKind::IncomingRequest { id },
        (Some(_), None) => MessageKind::Response,
        _ => MessageKind::Notification,
    }
}

/// One prompt content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Tool-protocol server descriptor passed in `session/new`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerDescriptor {
    Http { name: String, url: String, headers: Vec<HeaderSpec> },
    Sse { name: String, url: String, headers: Vec<HeaderSpec> },
}

impl McpServerDescriptor {
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Http {
            name: name.into(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Sse {
            name: name.into(),
            url: url.into(),
            headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HeaderSpec {
    pub name: String,
    pub value: String,
}

/// Which tool-protocol transports the agent declared in `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct McpTransports {
    pub http: bool,
    pub sse: bool,
}

impl McpTransports {
    /// Read from the `agentCapabilities.mcpCapabilities` object.
    pub fn from_capabilities(caps: &serde_json::Value) -> Self {
        let mcp = &caps["mcpCapabilities"];
        Self {
            http: mcp["http"].as_bool().unwrap_or(false),
            sse: mcp["sse"].as_bool().unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_response() {
        let json = json!({"id": 1, "result": {}});
        assert_eq!(classify_message(&json), MessageKind::Response);
    }

    #[test]
    fn classify_incoming_request() {
        let json = json!({"id": 4, "method": "fs/read_text_file", "params": {}});
        assert_eq!(classify_message(&json), MessageKind::IncomingRequest { id: 4 });
    }

    #[test]
    fn classify_notification() {
        let json = json!({"method": "session/update", "params": {}});
        assert_eq!(classify_message(&json), MessageKind::Notification);
    }

    #[test]
    fn classify_neither_is_notification() {
        let json = json!({"data": "noise"});
        assert_eq!(classify_message(&json), MessageKind::Notification);
    }

    #[test]
    fn request_ids_are_unique() {
        let a = JsonRpcRequest::new("session/prompt", None);
        let b = JsonRpcRequest::new("session/prompt", None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn content_block_wire_shape() {
        let block = ContentBlock::text("hello");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json, json!({"type": "text", "text": "hello"}));
    }

    #[test]
    fn server_descriptor_wire_shape() {
        let sse = McpServerDescriptor::sse("tasks", "http://localhost:1234/sse/tasks/");
        let json = serde_json::to_value(&sse).unwrap();
        assert_eq!(json["type"], "sse");
        assert_eq!(json["name"], "tasks");

        let http = McpServerDescriptor::http("tasks", "http://localhost:1234/mcp/tasks/");
        let json = serde_json::to_value(&http).unwrap();
        assert_eq!(json["type"], "http");
    }

    #[test]
    fn transports_parse_from_capabilities() {
        let caps = json!({"mcpCapabilities": {"http": true, "sse": false}});
        let t = McpTransports::from_capabilities(&caps);
        assert!(t.http);
        assert!(!t.sse);

        // Absent capabilities mean no HTTP transports at all
        let t = McpTransports::from_capabilities(&json!({}));
        assert_eq!(t, McpTransports::default());
    }

    #[test]
    fn error_response_shape() {
        let out = JsonRpcResponseOut::err(9, RpcError::method_not_found("nope"));
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["id"], 9);
        assert_eq!(json["error"]["code"], -32601);
        assert!(json.get("result").is_none());
    }
}
