//! Client-side handler for agent callbacks and session updates.
//!
//! One handler exists per external agent session. It services the agent's
//! `fs/*`, `terminal/*`, and `session/request_permission` requests, and it
//! interprets the `session/update` notification stream into per-prompt
//! accumulators (response text, tool interactions, in-flight tool titles).
//! The accumulators are written by the reader task and read by the runner,
//! guarded by a single lock and cleared before each prompt.

use crate::protocol::RpcError;
use crate::terminal::TerminalManager;
use rostrum_common::ToolInteraction;
use rostrum_sandbox::Sandbox;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Concatenate the text of each `content` block in a tool-call-update's
/// `content` array (each entry shaped `{"type": "content", "content": {"type": "text", "text": ...}}`).
fn extract_tool_text(content: &Value) -> String {
    let mut out = String::new();
    if let Some(items) = content.as_array() {
        for item in items {
            if let Some(text) = item["content"]["text"].as_str() {
                out.push_str(text);
            }
        }
    }
    out
}

/// Streaming hooks set for the duration of one prompt.
pub struct PromptHooks {
    pub on_token: Box<dyn Fn(&str) + Send + Sync>,
    pub on_tool_call: Box<dyn Fn(&str) + Send + Sync>,
    pub on_tool_result: Box<dyn Fn(&str, &str) + Send + Sync>,
}

#[derive(Default)]
struct PromptState {
    response: String,
    interactions: Vec<ToolInteraction>,
    /// tool_call_id → title, for pairing updates with their announcement
    in_flight: HashMap<String, String>,
    hooks: Option<Arc<PromptHooks>>,
}

/// Handles callbacks from one external agent.
pub struct ClientHandler {
    sandbox: Option<Arc<Sandbox>>,
    workspace_dir: PathBuf,
    pub terminals: TerminalManager,
    prompt: Mutex<PromptState>,
}

impl ClientHandler {
    pub fn new(sandbox: Option<Arc<Sandbox>>, workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            sandbox: sandbox.clone(),
            workspace_dir: workspace_dir.into(),
            terminals: TerminalManager::new(sandbox),
            prompt: Mutex::new(PromptState::default()),
        }
    }

    /// Clear per-prompt state and install the hooks for the next prompt.
    pub fn reset(&self, hooks: PromptHooks) {
        let mut state = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
        *state = PromptState {
            hooks: Some(Arc::new(hooks)),
            ..PromptState::default()
        };
    }

    /// The accumulated response so far (used for error partials).
    pub fn partial_text(&self) -> String {
        let state = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
        state.response.clone()
    }

    /// Take the finished prompt's text and interactions.
    pub fn take_result(&self) -> (String, Vec<ToolInteraction>) {
        let mut state = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
        (
            std::mem::take(&mut state.response),
            std::mem::take(&mut state.interactions),
        )
    }

    /// Interpret one `session/update` notification.
    pub fn handle_session_update(&self, params: &Value) {
        let update = &params["update"];
        match update["sessionUpdate"].as_str().unwrap_or_default() {
            "agent_message_chunk" => {
                if let Some(text) = update["content"]["text"].as_str() {
                    let hooks = {
                        let mut state = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
                        state.response.push_str(text);
                        state.hooks.clone()
                    };
                    if let Some(hooks) = hooks {
                        (hooks.on_token)(text);
                    }
                }
            }
            "tool_call" => {
                let id = update["toolCallId"].as_str().unwrap_or_default();
                let title = update["title"].as_str().unwrap_or(id);
                debug!(tool_call = %id, %title, "Agent tool call");
                let hooks = {
                    let mut state = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
                    state.in_flight.insert(id.to_string(), title.to_string());
                    state.hooks.clone()
                };
                if let Some(hooks) = hooks {
                    (hooks.on_tool_call)(title);
                }
            }
            "tool_call_update" => {
                let status = update["status"].as_str().unwrap_or_default();
                trace!(tool_call = %update["toolCallId"], %status, "Tool call update");
                if status == "completed" {
                    let id = update["toolCallId"].as_str().unwrap_or_default();
                    let output = extract_tool_text(&update["content"]);
                    let (title, hooks) = {
                        let mut state = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
                        let title = state.in_flight.remove(id).unwrap_or_default();
                        state
                            .interactions
                            .push(ToolInteraction::new(title.clone(), output.clone()));
                        (title, state.hooks.clone())
                    };
                    if let Some(hooks) = hooks {
                        (hooks.on_tool_result)(&title, &output);
                    }
                }
            }
            // Thoughts and plan updates are consumed silently
            "agent_thought_chunk" | "plan" => {}
            other => trace!(update = %other, "Ignoring session update"),
        }
    }

    /// Service a request the agent sent us. The error side maps onto a
    /// JSON-RPC error frame.
    pub async fn handle_request(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, RpcError> {
        match method {
            "fs/read_text_file" => self.read_text_file(params).await,
            "fs/write_text_file" => self.write_text_file(params).await,
            "session/request_permission" => Ok(self.request_permission(&params)),
            "terminal/create" => self.terminal_create(params),
            "terminal/output" => self.terminal_output(&params),
            "terminal/wait_for_exit" => self.terminal_wait(&params).await,
            "terminal/kill" => self.terminal_kill(&params),
            "terminal/release" => self.terminal_release(&params),
            other => {
                warn!(method = %other, "Agent called an unsupported method");
                Err(RpcError::method_not_found(other))
            }
        }
    }

    // --- fs callbacks ---

    fn resolve(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        if path.is_absolute() {
            path
        } else {
            self.workspace_dir.join(path)
        }
    }

    async fn read_text_file(&self, params: Value) -> std::result::Result<Value, RpcError> {
        #[derive(Deserialize)]
        struct ReadParams {
            path: String,
            #[serde(default)]
            line: Option<usize>,
            #[serde(default)]
            limit: Option<usize>,
        }
        let params: ReadParams =
            serde_json::from_value(params).map_err(|e| RpcError::internal(e.to_string()))?;
        let path = self.resolve(&params.path);
        debug!(path = %path.display(), "fs/read_text_file");

        let content = if let Some(ref sandbox) = self.sandbox {
            sandbox
                .execute(&format!("cat {:?}", path.display().to_string()))
                .await
                .map_err(|e| RpcError::internal(format!("read {} in sandbox: {e}", path.display())))?
        } else {
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| RpcError::internal(format!("read {}: {e}", path.display())))?
        };

        let content = slice_lines(&content, params.line, params.limit);
        Ok(json!({"content": content}))
    }

    async fn write_text_file(&self, params: Value) -> std::result::Result<Value, RpcError> {
        #[derive(Deserialize)]
        struct WriteParams {
            path: String,
            content: String,
        }
        let params: WriteParams =
            serde_json::from_value(params).map_err(|e| RpcError::internal(e.to_string()))?;
        let path = self.resolve(&params.path);
        debug!(path = %path.display(), bytes = params.content.len(), "fs/write_text_file");

        if let Some(ref sandbox) = self.sandbox {
            let display = path.display().to_string();
            if let Some(dir) = path.parent() {
                let _ = sandbox
                    .execute(&format!("mkdir -p {:?}", dir.display().to_string()))
                    .await;
            }
            // Heredoc sidesteps shell escaping of the content itself
            let cmd = format!(
                "cat > {:?} << 'ROSTRUM_EOF'\n{}\nROSTRUM_EOF",
                display, params.content
            );
            sandbox
                .execute(&cmd)
                .await
                .map_err(|e| RpcError::internal(format!("write {display} in sandbox: {e}")))?;
        } else {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| RpcError::internal(format!("mkdir {}: {e}", dir.display())))?;
            }
            tokio::fs::write(&path, &params.content)
                .await
                .map_err(|e| RpcError::internal(format!("write {}: {e}", path.display())))?;
        }
        Ok(json!({}))
    }

    // --- permission callback ---

    /// Auto-approve, preferring an allow option when the request offers one.
    fn request_permission(&self, params: &Value) -> Value {
        debug!("Auto-approving permission request");
        let options = params["options"].as_array();
        let selected = options.and_then(|opts| {
            opts.iter()
                .find(|o| {
                    matches!(o["kind"].as_str(), Some("allow_once") | Some("allow_always"))
                })
                .or_else(|| opts.first())
        });

        match selected.and_then(|o| o["optionId"].as_str()) {
            Some(option_id) => json!({
                "outcome": {"outcome": "selected", "optionId": option_id}
            }),
            None => json!({"outcome": {"outcome": "cancelled"}}),
        }
    }

    // --- terminal callbacks ---

    fn terminal_create(&self, params: Value) -> std::result::Result<Value, RpcError> {
        #[derive(Deserialize)]
        struct CreateParams {
            command: String,
            #[serde(default)]
            args: Vec<String>,
            #[serde(default)]
            cwd: Option<String>,
        }
        let params: CreateParams =
            serde_json::from_value(params).map_err(|e| RpcError::internal(e.to_string()))?;
        let id = self
            .terminals
            .create(&params.command, &params.args, params.cwd.as_deref());
        Ok(json!({"terminalId": id}))
    }

    fn terminal_id(params: &Value) -> std::result::Result<&str, RpcError> {
        params["terminalId"]
            .as_str()
            .ok_or_else(|| RpcError::internal("terminalId is required"))
    }

    fn terminal_output(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let id = Self::terminal_id(params)?;
        let output = self
            .terminals
            .output(id)
            .map_err(|e| RpcError::internal(e.to_string()))?;
        Ok(json!({"output": output, "truncated": false}))
    }

    async fn terminal_wait(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let id = Self::terminal_id(params)?;
        let exit_code = self
            .terminals
            .wait_for_exit(id)
            .await
            .map_err(|e| RpcError::internal(e.to_string()))?;
        Ok(json!({"exitCode": exit_code}))
    }

    fn terminal_kill(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let id = Self::terminal_id(params)?;
        self.terminals
            .kill(id)
            .map_err(|e| RpcError::internal(e.to_string()))?;
        Ok(json!({}))
    }

    fn terminal_release(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let id = Self::terminal_id(params)?;
        self.terminals.release(id);
        Ok(json!({}))
    }
}

/// Apply 1-based `line` and `limit` slicing to file content.
fn slice_lines(content: &str, line: Option<usize>, limit: Option<usize>) -> String {
    if line.is_none() && limit.is_none() {
        return content.to_string();
    }
    let lines: Vec<&str> = content.split('\n').collect();
    let start = line
        .filter(|l| *l > 0)
        .map(|l| (l - 1).min(lines.len()))
        .unwrap_or(0);
    let end = match limit.filter(|l| *l > 0) {
        Some(limit) => (start + limit).min(lines.len()),
        None => lines.len(),
    };
    lines[start..end].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_op_hooks() -> PromptHooks {
        PromptHooks {
            on_token: Box::new(|_| {}),
            on_tool_call: Box::new(|_| {}),
            on_tool_result: Box::new(|_, _| {}),
        }
    }

    fn handler() -> ClientHandler {
        ClientHandler::new(None, std::env::temp_dir())
    }

    #[test]
    fn message_chunks_accumulate() {
        let h = handler();
        h.reset(no_op_hooks());
        h.handle_session_update(&json!({
            "update": {"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": "Hel"}}
        }));
        h.handle_session_update(&json!({
            "update": {"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": "lo"}}
        }));
        let (text, interactions) = h.take_result();
        assert_eq!(text, "Hello");
        assert!(interactions.is_empty());
    }

    #[test]
    fn completed_tool_calls_become_interactions() {
        let h = handler();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        h.reset(PromptHooks {
            on_token: Box::new(|_| {}),
            on_tool_call: Box::new(|_| {}),
            on_tool_result: Box::new(move |title, output| {
                seen_clone
                    .lock()
                    .unwrap()
                    .push((title.to_string(), output.to_string()));
            }),
        });

        h.handle_session_update(&json!({
            "update": {"sessionUpdate": "tool_call", "toolCallId": "tc1", "title": "Read file", "status": "pending"}
        }));
        h.handle_session_update(&json!({
            "update": {
                "sessionUpdate": "tool_call_update",
                "toolCallId": "tc1",
                "status": "completed",
                "content": [
                    {"type": "content", "content": {"type": "text", "text": "file body"}}
                ]
            }
        }));

        let (_, interactions) = h.take_result();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].command, "Read file");
        assert_eq!(interactions[0].output, "file body");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn thoughts_and_plans_are_discarded() {
        let h = handler();
        h.reset(no_op_hooks());
        h.handle_session_update(&json!({
            "update": {"sessionUpdate": "agent_thought_chunk", "content": {"type": "text", "text": "thinking"}}
        }));
        h.handle_session_update(&json!({
            "update": {"sessionUpdate": "plan", "entries": []}
        }));
        let (text, interactions) = h.take_result();
        assert!(text.is_empty());
        assert!(interactions.is_empty());
    }

    #[test]
    fn reset_clears_previous_prompt() {
        let h = handler();
        h.reset(no_op_hooks());
        h.handle_session_update(&json!({
            "update": {"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": "old"}}
        }));
        h.reset(no_op_hooks());
        let (text, _) = h.take_result();
        assert!(text.is_empty());
    }

    #[test]
    fn permission_prefers_allow_option() {
        let h = handler();
        let response = h.request_permission(&json!({
            "options": [
                {"optionId": "deny", "kind": "reject_once"},
                {"optionId": "ok", "kind": "allow_once"}
            ]
        }));
        assert_eq!(response["outcome"]["optionId"], "ok");
    }

    #[test]
    fn permission_falls_back_to_first_option() {
        let h = handler();
        let response = h.request_permission(&json!({
            "options": [{"optionId": "only", "kind": "reject_once"}]
        }));
        assert_eq!(response["outcome"]["optionId"], "only");
    }

    #[test]
    fn permission_without_options_cancels() {
        let h = handler();
        let response = h.request_permission(&json!({}));
        assert_eq!(response["outcome"]["outcome"], "cancelled");
    }

    #[tokio::test]
    async fn fs_roundtrip_on_host() {
        let dir = tempfile::tempdir().unwrap();
        let h = ClientHandler::new(None, dir.path());

        h.handle_request(
            "fs/write_text_file",
            json!({"path": "notes/a.txt", "content": "one\ntwo\nthree"}),
        )
        .await
        .unwrap();

        let read = h
            .handle_request("fs/read_text_file", json!({"path": "notes/a.txt"}))
            .await
            .unwrap();
        assert_eq!(read["content"], "one\ntwo\nthree");

        let sliced = h
            .handle_request(
                "fs/read_text_file",
                json!({"path": "notes/a.txt", "line": 2, "limit": 1}),
            )
            .await
            .unwrap();
        assert_eq!(sliced["content"], "two");
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let h = handler();
        let err = h.handle_request("fs/delete", json!({})).await.unwrap_err();
        assert_eq!(err.code, -32601);
    }

    #[test]
    fn slice_lines_bounds() {
        let content = "a\nb\nc";
        assert_eq!(slice_lines(content, None, None), "a\nb\nc");
        assert_eq!(slice_lines(content, Some(2), None), "b\nc");
        assert_eq!(slice_lines(content, None, Some(2)), "a\nb");
        assert_eq!(slice_lines(content, Some(5), None), "");
        assert_eq!(slice_lines(content, Some(1), Some(99)), "a\nb\nc");
    }
}
