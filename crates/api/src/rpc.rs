//! Stateless JSON-RPC dispatch for the tool protocol.
//!
//! Every request is served by looking up the target furniture and calling
//! it; there is no per-connection protocol state. Results are returned as
//! a single text block carrying the JSON encoding of the furniture's
//! return value; furniture errors come back as an error-flagged result
//! whose text is the error message.

use rostrum_furniture::Furniture;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// The protocol revision we advertise.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Handle one JSON-RPC frame against a furniture. Returns `None` for
/// notifications (which get no response frame).
pub async fn dispatch(furniture: &Arc<dyn Furniture>, frame: Value) -> Option<Value> {
    let id = frame.get("id").cloned();
    let method = frame["method"].as_str().unwrap_or_default().to_string();

    // Notifications (no id) are acknowledged by silence.
    let id = match id {
        Some(id) if !id.is_null() => id,
        _ => {
            debug!(%method, "Tool-protocol notification");
            return None;
        }
    };

    debug!(furniture = %furniture.name(), %method, "Tool-protocol request");

    let result = match method.as_str() {
        "initialize" => json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {
                "name": furniture.name(),
                "version": env!("CARGO_PKG_VERSION")
            }
        }),
        "ping" => json!({}),
        "tools/list" => {
            let tools: Vec<Value> = furniture
                .tools()
                .into_iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": t.parameters,
                    })
                })
                .collect();
            json!({"tools": tools})
        }
        "tools/call" => {
            let params = &frame["params"];
            let tool = params["name"].as_str().unwrap_or_default();
            let args = params["arguments"]
                .as_object()
                .cloned()
                .unwrap_or_default();
            match furniture.call(tool, args).await {
                Ok(value) => {
                    let text =
                        serde_json::to_string(&value).unwrap_or_else(|_| value.to_string());
                    json!({
                        "content": [{"type": "text", "text": text}],
                        "isError": false
                    })
                }
                Err(e) => json!({
                    "content": [{"type": "text", "text": e.to_string()}],
                    "isError": true
                }),
            }
        }
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("method not found: {other}")}
            }));
        }
    };

    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}
