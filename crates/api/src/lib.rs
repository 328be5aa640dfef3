//! HTTP server exposing floor furniture as tool-protocol endpoints.
//!
//! Each registered furniture is mounted at two URL families under one
//! listener:
//!
//! - `/api/v1/floors/{floor}/mcp/{name}/` - streamable HTTP: POST a
//!   JSON-RPC frame, get the response frame in the body.
//! - `/api/v1/floors/{floor}/sse/{name}/` - SSE: GET opens the event
//!   stream (first event names the message endpoint), POSTs to the
//!   message endpoint are answered over the stream.
//!
//! Both families share the same stateless dispatch in [`rpc`]; the SSE
//! channel registry exists only because the SSE wire format requires
//! responses on the stream, not because any protocol state is kept.

pub mod rpc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use rostrum_common::{Result, RostrumError};
use rostrum_furniture::Furniture;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

struct ServerState {
    /// "{floor}/{name}" → furniture
    furniture: RwLock<HashMap<String, Arc<dyn Furniture>>>,
    /// Open SSE connections by generated session id
    sse_sessions: Mutex<HashMap<String, mpsc::UnboundedSender<SseEvent>>>,
}

impl ServerState {
    fn lookup(&self, floor: &str, name: &str) -> Option<Arc<dyn Furniture>> {
        self.furniture
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&format!("{floor}/{name}"))
            .cloned()
    }
}

/// Serves tool-protocol endpoints for furniture over HTTP.
pub struct ApiServer {
    state: Arc<ServerState>,
    listener: Mutex<Option<SocketAddr>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ApiServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ServerState {
                furniture: RwLock::new(HashMap::new()),
                sse_sessions: Mutex::new(HashMap::new()),
            }),
            listener: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Mount a furniture under both endpoint families.
    pub fn register_furniture(&self, floor: &str, name: &str, furniture: Arc<dyn Furniture>) {
        info!(%floor, %name, "Registering furniture endpoints");
        self.state
            .furniture
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(format!("{floor}/{name}"), furniture);
    }

    /// Bind the listener and start serving in a background task.
    /// Pass "127.0.0.1:0" for an auto-assigned port.
    pub async fn start(&self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| RostrumError::Api(format!("failed to listen on {addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| RostrumError::Api(e.to_string()))?;

        let router = build_router(Arc::clone(&self.state));
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                warn!(error = %e, "API server exited");
            }
        });

        info!(%local, "Tool-protocol server listening");
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(local);
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(())
    }

    /// Shut the server down.
    pub fn stop(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }

    /// Base URL of the running server, e.g. "http://127.0.0.1:49152".
    /// Empty before `start`.
    pub fn base_url(&self) -> String {
        match *self.listener.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(addr) => format!("http://{addr}"),
            None => String::new(),
        }
    }

    /// The streamable-HTTP URL for a mounted furniture.
    pub fn mcp_url(&self, floor: &str, name: &str) -> String {
        format!("{}/api/v1/floors/{floor}/mcp/{name}/", self.base_url())
    }

    /// The SSE URL for a mounted furniture.
    pub fn sse_url(&self, floor: &str, name: &str) -> String {
        format!("{}/api/v1/floors/{floor}/sse/{name}/", self.base_url())
    }
}

impl Default for ApiServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/floors/{floor}/mcp/{name}", post(mcp_post))
        .route("/api/v1/floors/{floor}/mcp/{name}/", post(mcp_post))
        .route("/api/v1/floors/{floor}/sse/{name}", get(sse_get))
        .route("/api/v1/floors/{floor}/sse/{name}/", get(sse_get))
        .route("/api/v1/floors/{floor}/sse/{name}/message", post(sse_message))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Streamable-HTTP endpoint: one JSON-RPC frame in, one frame out.
async fn mcp_post(
    State(state): State<Arc<ServerState>>,
    Path((floor, name)): Path<(String, String)>,
    Json(frame): Json<Value>,
) -> axum::response::Response {
    let Some(furniture) = state.lookup(&floor, &name) else {
        return (StatusCode::NOT_FOUND, "unknown furniture").into_response();
    };
    match rpc::dispatch(&furniture, frame).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// SSE endpoint: opens the stream and announces the message endpoint.
async fn sse_get(
    State(state): State<Arc<ServerState>>,
    Path((floor, name)): Path<(String, String)>,
) -> axum::response::Response {
    if state.lookup(&floor, &name).is_none() {
        return (StatusCode::NOT_FOUND, "unknown furniture").into_response();
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    state
        .sse_sessions
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(session_id.clone(), tx);
    debug!(%floor, %name, session = %session_id, "SSE stream opened");

    let endpoint = format!(
        "/api/v1/floors/{floor}/sse/{name}/message?sessionId={session_id}"
    );
    let first = futures::stream::once(async move {
        Ok::<_, Infallible>(SseEvent::default().event("endpoint").data(endpoint))
    });
    let rest = channel_stream(rx);

    Sse::new(first.chain(rest))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn channel_stream(
    rx: mpsc::UnboundedReceiver<SseEvent>,
) -> impl Stream<Item = std::result::Result<SseEvent, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    })
}

#[derive(serde::Deserialize)]
struct SseQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Message endpoint for the SSE family: dispatch the frame, push the
/// response over the caller's stream.
async fn sse_message(
    State(state): State<Arc<ServerState>>,
    Path((floor, name)): Path<(String, String)>,
    Query(query): Query<SseQuery>,
    Json(frame): Json<Value>,
) -> axum::response::Response {
    let Some(furniture) = state.lookup(&floor, &name) else {
        return (StatusCode::NOT_FOUND, "unknown furniture").into_response();
    };

    if let Some(response) = rpc::dispatch(&furniture, frame).await {
        let payload = response.to_string();
        let sender = state
            .sse_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&query.session_id)
            .cloned();
        match sender {
            Some(tx) => {
                if tx
                    .send(SseEvent::default().event("message").data(payload))
                    .is_err()
                {
                    // Stream already gone; drop the dead session.
                    state
                        .sse_sessions
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&query.session_id);
                }
            }
            None => {
                return (StatusCode::NOT_FOUND, "unknown session").into_response();
            }
        }
    }

    StatusCode::ACCEPTED.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rostrum_furniture::TaskBoard;
    use serde_json::json;

    async fn running_server() -> ApiServer {
        let server = ApiServer::new();
        server.register_furniture("default", "tasks", Arc::new(TaskBoard::new()));
        server.start("127.0.0.1:0").await.unwrap();
        server
    }

    #[tokio::test]
    async fn streamable_http_end_to_end() {
        let server = running_server().await;
        let url = server.mcp_url("default", "tasks");
        let http = reqwest::Client::new();

        let init: Value = http
            .post(&url)
            .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(init["result"]["serverInfo"]["name"], "tasks");

        let listed: Value = http
            .post(&url)
            .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["result"]["tools"].as_array().unwrap().len(), 4);

        let added: Value = http
            .post(&url)
            .json(&json!({
                "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": {"name": "add_task", "arguments": {"title": "Test task"}}
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(added["result"]["isError"], false);

        server.stop();
    }

    #[tokio::test]
    async fn unknown_furniture_is_404() {
        let server = running_server().await;
        let url = format!(
            "{}/api/v1/floors/default/mcp/nonexistent/",
            server.base_url()
        );
        let status = reqwest::Client::new()
            .post(&url)
            .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status.as_u16(), 404);
        server.stop();
    }

    #[tokio::test]
    async fn both_url_families_are_mounted() {
        let server = running_server().await;
        assert!(server.mcp_url("default", "tasks").contains("/mcp/tasks/"));
        assert!(server.sse_url("default", "tasks").contains("/sse/tasks/"));
        server.stop();
    }

    #[tokio::test]
    async fn shared_state_across_requests() {
        let server = running_server().await;
        let url = server.mcp_url("default", "tasks");
        let http = reqwest::Client::new();

        for title in ["one", "two"] {
            http.post(&url)
                .json(&json!({
                    "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                    "params": {"name": "add_task", "arguments": {"title": title}}
                }))
                .send()
                .await
                .unwrap();
        }

        let listed: Value = http
            .post(&url)
            .json(&json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {"name": "list_tasks", "arguments": {}}
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let text = listed["result"]["content"][0]["text"].as_str().unwrap();
        let body: Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["count"], 2);

        server.stop();
    }
}
