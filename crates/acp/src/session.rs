//! External-agent session lifecycle.
//!
//! One `AgentSession` is created per external agent at floor start. It
//! spawns the agent process, owns the newline-delimited JSON-RPC channel
//! over the child's stdio, and runs a single background reader task that:
//!
//! - fulfils responses to requests we issued (oneshot correlation),
//! - hands `session/update` notifications to the [`ClientHandler`],
//! - spawns a task per incoming agent request so that blocking callbacks
//!   (`terminal/wait_for_exit`) never stall the channel.

use crate::client::{ClientHandler, PromptHooks};
use crate::protocol::{
    classify_message, ContentBlock, JsonRpcRequest, JsonRpcResponse, JsonRpcResponseOut,
    McpServerDescriptor, McpTransports,
};
use regex::Regex;
use rostrum_common::{Result, RostrumError, ToolInteraction};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, LazyLock, Mutex as StdMutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static ENV_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}").expect("env ref pattern"));

/// Expand `${NAME}` references against the parent environment. Unset
/// variables expand to the empty string.
fn expand_env(value: &str) -> String {
    ENV_REF
        .replace_all(value, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// The result of one completed prompt.
#[derive(Debug)]
pub struct PromptOutcome {
    pub content: String,
    pub interactions: Vec<ToolInteraction>,
    pub stop_reason: String,
}

/// A connection to one running external agent.
pub struct AgentSession {
    child: StdMutex<Option<Child>>,
    writer: Arc<Mutex<ChildStdin>>,
    pending: PendingMap,
    client: Arc<ClientHandler>,
    session_id: StdMutex<Option<String>>,
    transports: StdMutex<McpTransports>,
    /// Tears down the reader task on close
    cancel: CancellationToken,
    /// Background reader task; exits on cancellation or pipe close
    _reader: tokio::task::JoinHandle<()>,
}

impl AgentSession {
    /// Spawn the agent process and start the reader task. The handshake
    /// (`initialize`, `session/new`) is a separate step.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        client: Arc<ClientHandler>,
    ) -> Result<Self> {
        info!(%command, "Starting external agent");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, expand_env(value));
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| RostrumError::Acp(format!("start agent {command:?}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RostrumError::Acp("agent stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RostrumError::Acp("agent stdout unavailable".to_string()))?;

        let writer = Arc::new(Mutex::new(stdin));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(Self::reader_loop(
            stdout,
            Arc::clone(&pending),
            Arc::clone(&client),
            Arc::clone(&writer),
            cancel.clone(),
        ));

        Ok(Self {
            child: StdMutex::new(Some(child)),
            writer,
            pending,
            client,
            session_id: StdMutex::new(None),
            transports: StdMutex::new(McpTransports::default()),
            cancel,
            _reader: reader,
        })
    }

    /// Single owner of the child's stdout. Ends when the pipe closes or
    /// the session is cancelled.
    async fn reader_loop(
        stdout: tokio::process::ChildStdout,
        pending: PendingMap,
        client: Arc<ClientHandler>,
        writer: Arc<Mutex<ChildStdin>>,
        cancel: CancellationToken,
    ) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Agent session cancelled");
                    break;
                }
                line = lines.next_line() => line,
            };
            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Agent stdout closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Agent channel read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let frame: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable agent frame");
                    continue;
                }
            };

            match classify_message(&frame) {
                crate::protocol::MessageKind::Response => {
                    let response: JsonRpcResponse = match serde_json::from_value(frame) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(error = %e, "Bad response frame from agent");
                            continue;
                        }
                    };
                    if let Some(id) = response.id {
                        let sender = pending.lock().await.remove(&id);
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => debug!(id, "No pending request for response"),
                        }
                    }
                }
                crate::protocol::MessageKind::IncomingRequest { id } => {
                    let method = frame["method"].as_str().unwrap_or_default().to_string();
                    let params = frame.get("params").cloned().unwrap_or(Value::Null);
                    let client = Arc::clone(&client);
                    let writer = Arc::clone(&writer);
                    // Callbacks like terminal/wait_for_exit block until the
                    // command completes; each request gets its own task.
                    tokio::spawn(async move {
                        let out = match client.handle_request(&method, params).await {
                            Ok(result) => JsonRpcResponseOut::ok(id, result),
                            Err(error) => JsonRpcResponseOut::err(id, error),
                        };
                        if let Err(e) = write_frame(&writer, &out).await {
                            warn!(error = %e, "Failed to answer agent request");
                        }
                    });
                }
                crate::protocol::MessageKind::Notification => {
                    if frame["method"] == "session/update" {
                        let params = frame.get("params").cloned().unwrap_or(Value::Null);
                        client.handle_session_update(&params);
                    }
                }
            }
        }

        // Unblock any caller still waiting on a response.
        pending.lock().await.clear();
    }

    /// Send a request and wait for its correlated response.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest::new(method, Some(params));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request.id, tx);

        if let Err(e) = write_frame(&self.writer, &request).await {
            self.pending.lock().await.remove(&request.id);
            return Err(e);
        }

        let response = rx
            .await
            .map_err(|_| RostrumError::Acp("agent channel closed".to_string()))?;

        if let Some(error) = response.error {
            return Err(RostrumError::Acp(format!("{method} failed: {}", error.message)));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Perform the `initialize` handshake, declaring our capabilities and
    /// recording which tool-protocol transports the agent accepts.
    pub async fn initialize(&self) -> Result<()> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": 1,
                    "clientCapabilities": {
                        "fs": {"readTextFile": true, "writeTextFile": true},
                        "terminal": true
                    },
                    "clientInfo": {"name": "rostrum", "version": env!("CARGO_PKG_VERSION")}
                }),
            )
            .await?;

        let transports = McpTransports::from_capabilities(&result["agentCapabilities"]);
        debug!(
            protocol = %result["protocolVersion"],
            http = transports.http,
            sse = transports.sse,
            "Agent initialized"
        );
        *self.transports.lock().unwrap_or_else(|e| e.into_inner()) = transports;
        Ok(())
    }

    /// Which tool-protocol transports the agent declared during `initialize`.
    pub fn transports(&self) -> McpTransports {
        *self.transports.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create the agent's session with the working directory and the
    /// tool-protocol servers it may reach.
    pub async fn new_session(&self, cwd: &str, servers: &[McpServerDescriptor]) -> Result<()> {
        let result = self
            .request(
                "session/new",
                json!({"cwd": cwd, "mcpServers": servers}),
            )
            .await?;

        let session_id = result["sessionId"]
            .as_str()
            .ok_or_else(|| RostrumError::Acp("session/new returned no sessionId".to_string()))?
            .to_string();
        debug!(session = %session_id, "Agent session created");
        *self.session_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(session_id);
        Ok(())
    }

    /// Send one prompt and block until the agent finishes. Streaming
    /// happens through the hooks; the accumulated text and interactions
    /// are returned.
    pub async fn prompt(
        &self,
        blocks: Vec<ContentBlock>,
        hooks: PromptHooks,
    ) -> Result<PromptOutcome> {
        let session_id = self
            .session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| RostrumError::Acp("no session established".to_string()))?;

        self.client.reset(hooks);

        let result = self
            .request(
                "session/prompt",
                json!({"sessionId": session_id, "prompt": blocks}),
            )
            .await
            .map_err(|e| {
                // Keep the partial text retrievable by the runner
                debug!(error = %e, "Prompt transport error");
                e
            })?;

        let stop_reason = result["stopReason"].as_str().unwrap_or_default().to_string();
        debug!(%stop_reason, "Prompt finished");

        let (content, interactions) = self.client.take_result();
        Ok(PromptOutcome {
            content,
            interactions,
            stop_reason,
        })
    }

    /// Text accumulated so far in the current prompt (for error partials).
    pub fn partial_text(&self) -> String {
        self.client.partial_text()
    }

    /// Kill the agent process and stop the reader.
    pub fn close(&self) {
        let child = {
            let mut guard = self.child.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(mut child) = child {
            let _ = child.start_kill();
        }
        self.cancel.cancel();
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_frame<T: serde::Serialize>(
    writer: &Arc<Mutex<ChildStdin>>,
    frame: &T,
) -> Result<()> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    let mut writer = writer.lock().await;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| RostrumError::Acp(format!("agent channel write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| RostrumError::Acp(format!("agent channel flush failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_substitutes_known_vars() {
        std::env::set_var("ROSTRUM_TEST_TOKEN", "sekrit");
        assert_eq!(expand_env("${ROSTRUM_TEST_TOKEN}"), "sekrit");
        assert_eq!(expand_env("prefix-${ROSTRUM_TEST_TOKEN}-suffix"), "prefix-sekrit-suffix");
    }

    #[test]
    fn expand_env_unknown_vars_become_empty() {
        assert_eq!(expand_env("${ROSTRUM_DOES_NOT_EXIST_42}"), "");
    }

    #[test]
    fn expand_env_leaves_plain_values() {
        assert_eq!(expand_env("plain-value"), "plain-value");
        assert_eq!(expand_env("$NOT_A_REF"), "$NOT_A_REF");
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let client = Arc::new(ClientHandler::new(None, std::env::temp_dir()));
        let err = AgentSession::spawn(
            "definitely-not-a-real-binary-9a7f",
            &[],
            &HashMap::new(),
            client,
        )
        .err()
        .expect("spawn should fail");
        assert!(err.to_string().contains("start agent"));
    }

    /// Drive a full handshake + prompt against a scripted fake agent
    /// implemented in bash: it answers initialize and session/new, then
    /// streams two message chunks before completing the prompt.
    #[tokio::test]
    async fn handshake_and_prompt_against_scripted_agent() {
        let script = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":1,"agentCapabilities":{"mcpCapabilities":{"http":true,"sse":true}}}}\n' "$id"
      ;;
    *'"session/new"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"sessionId":"sess-1"}}\n' "$id"
      ;;
    *'"session/prompt"'*)
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"sess-1","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"Hello "}}}}\n'
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"sess-1","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"floor"}}}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"stopReason":"end_turn"}}\n' "$id"
      ;;
  esac
done
"#;
        let client = Arc::new(ClientHandler::new(None, std::env::temp_dir()));
        let session = AgentSession::spawn(
            "bash",
            &["-c".to_string(), script.to_string()],
            &HashMap::new(),
            client,
        )
        .unwrap();

        session.initialize().await.unwrap();
        assert!(session.transports().sse);

        session.new_session("/tmp", &[]).await.unwrap();

        let tokens = Arc::new(StdMutex::new(String::new()));
        let tokens_clone = Arc::clone(&tokens);
        let outcome = session
            .prompt(
                vec![ContentBlock::text("hi")],
                PromptHooks {
                    on_token: Box::new(move |t| tokens_clone.lock().unwrap().push_str(t)),
                    on_tool_call: Box::new(|_| {}),
                    on_tool_result: Box::new(|_, _| {}),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.content, "Hello floor");
        assert_eq!(outcome.stop_reason, "end_turn");
        assert_eq!(*tokens.lock().unwrap(), "Hello floor");

        session.close();
    }
}
