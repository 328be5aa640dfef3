//! OpenAI-compatible chat-completion client with SSE streaming.
//!
//! The client always streams. Content deltas are forwarded to the caller's
//! token callback as they arrive; tool-call fragments are joined by stream
//! index into whole calls and returned with the final result.

use crate::tools::{FunctionCall, Tool, ToolCall};
use futures::StreamExt;
use rostrum_common::{Result, RostrumError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A chat message in the provider wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Speaker name attached to user messages from other participants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn named_user(name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::text(Role::User, content);
        msg.name = Some(name.into());
        msg
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// An assistant message carrying tool calls (content optional).
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            name: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// The tool-result message paired with a prior tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(output.into()),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Tool]>,
}

/// One SSE chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    function: FunctionDelta,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// The accumulated result of one streaming request.
#[derive(Debug, Clone, Default)]
pub struct ChatResult {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// An OpenAI-compatible chat-completion client.
pub struct ChatClient {
    endpoint: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            api_key,
            http: reqwest::Client::new(),
        }
    }

    /// Send a streaming chat request. `on_token` is invoked for every
    /// content delta as it arrives; the full content and any tool calls
    /// are returned once the stream ends.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
        tools: &[Tool],
        on_token: &mut dyn FnMut(&str),
    ) -> Result<ChatResult> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = ChatRequest {
            model,
            messages,
            temperature,
            stream: true,
            tools: if tools.is_empty() { None } else { Some(tools) },
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(%url, model, message_count = messages.len(), tool_count = tools.len(), "Starting chat stream");

        let response = request
            .send()
            .await
            .map_err(|e| RostrumError::Llm(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RostrumError::Llm(format!("API error {status}: {body_text}")));
        }

        let mut acc = StreamAccumulator::default();
        let mut byte_stream = response.bytes_stream();
        let mut buf = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let chunk =
                chunk.map_err(|e| RostrumError::Llm(format!("stream read failed: {e}")))?;
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buf.find('\n') {
                let line: String = buf.drain(..=pos).collect();
                acc.handle_line(line.trim(), on_token);
            }
        }
        // A final data line without a trailing newline is still a frame.
        if !buf.trim().is_empty() {
            acc.handle_line(buf.trim(), on_token);
        }

        Ok(acc.finish())
    }
}

/// Joins streamed deltas into full content and whole tool calls.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    /// Stream index → partially assembled call
    tool_calls: BTreeMap<usize, ToolCall>,
}

impl StreamAccumulator {
    fn handle_line(&mut self, line: &str, on_token: &mut dyn FnMut(&str)) {
        let Some(data) = line.strip_prefix("data: ") else {
            return;
        };
        if data == "[DONE]" {
            return;
        }
        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Skipping unparseable stream chunk");
                return;
            }
        };
        self.apply(chunk, on_token);
    }

    fn apply(&mut self, chunk: StreamChunk, on_token: &mut dyn FnMut(&str)) {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                self.content.push_str(&content);
                on_token(&content);
            }
        }

        for delta in choice.delta.tool_calls {
            let call = self.tool_calls.entry(delta.index).or_insert_with(|| ToolCall {
                id: String::new(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: String::new(),
                    arguments: String::new(),
                },
            });
            if let Some(id) = delta.id {
                if !id.is_empty() {
                    call.id = id;
                }
            }
            if let Some(kind) = delta.kind {
                if !kind.is_empty() {
                    call.kind = kind;
                }
            }
            if let Some(name) = delta.function.name {
                if !name.is_empty() {
                    call.function.name = name;
                }
            }
            if let Some(args) = delta.function.arguments {
                call.function.arguments.push_str(&args);
            }
        }
    }

    fn finish(self) -> ChatResult {
        ChatResult {
            content: self.content,
            tool_calls: self.tool_calls.into_values().collect(),
        }
    }
}
