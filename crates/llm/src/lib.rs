//! Streaming chat-completion client for native agents.
//!
//! Native agents are driven through an OpenAI-compatible `/chat/completions`
//! endpoint with SSE streaming and function-call tools. This crate owns the
//! wire types and the delta-joining logic; tool dispatch lives with the
//! runner in `rostrum-floor`.

pub mod client;
pub mod tools;

pub use client::{ChatClient, ChatMessage, ChatResult, Role};
pub use tools::{bash_tool, FunctionCall, FunctionDef, Tool, ToolCall};
