//! Furniture adapter that proxies another MCP tool server.
//!
//! On construction the adapter connects to the remote server (a subprocess
//! over stdio, or a streamable-HTTP URL), performs the handshake, and
//! caches the remote tool list as its own. `call` is a straight proxy that
//! returns the concatenated text content of the remote result.

use crate::{Args, Furniture, ToolSpec};
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, CallToolResult, Content, RawContent};
use rmcp::service::{Peer, RoleClient};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::ServiceExt;
use rostrum_common::{Result, RostrumError};
use serde_json::json;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

enum Backend {
    Stdio {
        peer: Peer<RoleClient>,
        /// Keeps the MCP connection task alive; aborted on close
        connection: tokio::task::JoinHandle<()>,
    },
    Http(HttpMcp),
}

/// A furniture backed by an external MCP server.
pub struct ExternalMcp {
    name: String,
    tools: Vec<ToolSpec>,
    backend: Arc<RwLock<Option<Backend>>>,
}

impl ExternalMcp {
    /// Spawn an MCP server subprocess and connect over stdio.
    pub async fn connect_stdio(name: &str, command: &str, args: &[String]) -> Result<Self> {
        info!(furniture = %name, %command, "Connecting to stdio MCP server");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let transport = TokioChildProcess::new(cmd).map_err(|e| {
            RostrumError::Furniture(format!("failed to spawn MCP server {command:?}: {e}"))
        })?;

        // The () handler means we issue requests but serve none ourselves.
        let running = ().serve(transport).await.map_err(|e| {
            RostrumError::Furniture(format!("MCP handshake with {name:?} failed: {e}"))
        })?;

        let peer = running.peer().clone();
        let connection = tokio::spawn(async move {
            let _ = running.waiting().await;
        });

        let tools: Vec<ToolSpec> = match peer.list_all_tools().await {
            Ok(remote) => remote
                .iter()
                .filter_map(|t| tool_spec_from_value(serde_json::to_value(t).ok()?))
                .collect(),
            Err(e) => {
                connection.abort();
                return Err(RostrumError::Furniture(format!(
                    "list tools for MCP server {name:?}: {e}"
                )));
            }
        };

        debug!(furniture = %name, tool_count = tools.len(), "Discovered remote tools");

        Ok(Self {
            name: name.to_string(),
            tools,
            backend: Arc::new(RwLock::new(Some(Backend::Stdio { peer, connection }))),
        })
    }

    /// Connect to a streamable-HTTP MCP endpoint.
    pub async fn connect_http(name: &str, url: &str) -> Result<Self> {
        info!(furniture = %name, %url, "Connecting to HTTP MCP server");

        let http = HttpMcp::new(url);
        http.initialize().await?;

        let listed = http.request("tools/list", json!({})).await?;
        let tools: Vec<ToolSpec> = listed["tools"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| tool_spec_from_value(t.clone()))
                    .collect()
            })
            .unwrap_or_default();

        debug!(furniture = %name, tool_count = tools.len(), "Discovered remote tools");

        Ok(Self {
            name: name.to_string(),
            tools,
            backend: Arc::new(RwLock::new(Some(Backend::Http(http)))),
        })
    }

    /// Shut down the connection; for stdio servers this kills the subprocess.
    pub async fn close(&self) {
        if let Some(backend) = self.backend.write().await.take() {
            if let Backend::Stdio { connection, .. } = backend {
                connection.abort();
            }
        }
    }
}

#[async_trait]
impl Furniture for ExternalMcp {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<ToolSpec> {
        self.tools.clone()
    }

    async fn call(&self, tool: &str, args: Args) -> Result<serde_json::Value> {
        let backend = self.backend.read().await;
        let backend = backend.as_ref().ok_or_else(|| {
            RostrumError::Furniture(format!("MCP furniture {:?} is closed", self.name))
        })?;

        match backend {
            Backend::Stdio { peer, .. } => {
                let request = CallToolRequestParam {
                    name: tool.to_string().into(),
                    arguments: Some(args),
                };
                let result = peer.call_tool(request).await.map_err(|e| {
                    RostrumError::Furniture(format!(
                        "call tool {tool:?} on {:?}: {e}",
                        self.name
                    ))
                })?;
                extract_stdio_result(&self.name, tool, &result)
            }
            Backend::Http(http) => {
                let result = http
                    .request("tools/call", json!({"name": tool, "arguments": args}))
                    .await?;
                extract_http_result(&self.name, tool, &result)
            }
        }
    }
}

/// Convert a serialized MCP tool (`{name, description, inputSchema}`) into
/// our ToolSpec, tolerating absent fields.
fn tool_spec_from_value(value: serde_json::Value) -> Option<ToolSpec> {
    let name = value.get("name")?.as_str()?.to_string();
    let description = value
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or_default()
        .to_string();
    let parameters = value
        .get("inputSchema")
        .cloned()
        .unwrap_or_else(|| json!({"type": "object"}));
    Some(ToolSpec {
        name,
        description,
        parameters,
    })
}

fn extract_stdio_result(
    furniture: &str,
    tool: &str,
    result: &CallToolResult,
) -> Result<serde_json::Value> {
    let text = extract_text(&result.content);
    if result.is_error.unwrap_or(false) {
        return Err(RostrumError::Furniture(format!("tool {tool:?} error: {text}")));
    }
    if text.is_empty() {
        warn!(%furniture, %tool, "Remote tool returned no text content");
        return Err(RostrumError::Furniture(format!(
            "tool {tool:?} returned no text content"
        )));
    }
    Ok(serde_json::Value::String(text))
}

fn extract_http_result(
    furniture: &str,
    tool: &str,
    result: &serde_json::Value,
) -> Result<serde_json::Value> {
    let text = result["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| {
                    (b["type"] == "text").then(|| b["text"].as_str().unwrap_or_default())
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if result["isError"].as_bool().unwrap_or(false) {
        return Err(RostrumError::Furniture(format!("tool {tool:?} error: {text}")));
    }
    if text.is_empty() {
        warn!(%furniture, %tool, "Remote tool returned no text content");
        return Err(RostrumError::Furniture(format!(
            "tool {tool:?} returned no text content"
        )));
    }
    Ok(serde_json::Value::String(text))
}

/// Pull text out of MCP content blocks.
fn extract_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(text) => Some(text.text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Minimal JSON-RPC client for a stateless streamable-HTTP MCP endpoint.
struct HttpMcp {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpMcp {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn initialize(&self) -> Result<()> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "rostrum", "version": env!("CARGO_PKG_VERSION")}
            }),
        )
        .await?;
        self.notify("notifications/initialized").await;
        Ok(())
    }

    async fn notify(&self, method: &str) {
        let body = json!({"jsonrpc": "2.0", "method": method});
        let _ = self
            .http
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(&body)
            .send()
            .await;
    }

    async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});

        let response = self
            .http
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| RostrumError::Furniture(format!("MCP request to {} failed: {e}", self.url)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(RostrumError::Furniture(format!(
                "MCP endpoint {} returned {status}: {text}",
                self.url
            )));
        }

        let frame = decode_rpc_body(&text).ok_or_else(|| {
            RostrumError::Furniture(format!("unparseable MCP response: {text}"))
        })?;

        if let Some(error) = frame.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown error");
            return Err(RostrumError::Furniture(format!("{method} failed: {message}")));
        }
        Ok(frame.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }
}

/// Decode a JSON-RPC frame from either a plain JSON body or an SSE body
/// (`data: {...}` lines), as streamable-HTTP servers may answer with either.
fn decode_rpc_body(body: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }
    for line in body.lines() {
        if let Some(data) = line.trim().strip_prefix("data: ") {
            if let Ok(value) = serde_json::from_str(data) {
                return Some(value);
            }
        }
    }
    None
}
