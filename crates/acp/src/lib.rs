//! External-agent protocol client.
//!
//! External agents are long-lived child processes speaking a bidirectional
//! JSON-RPC protocol over stdio. The coordinator creates one
//! [`AgentSession`] per external agent at floor start; the floor's ACP
//! runner drives one prompt per turn through it.

pub mod client;
pub mod protocol;
pub mod session;
pub mod terminal;

pub use client::{ClientHandler, PromptHooks};
pub use protocol::{ContentBlock, McpServerDescriptor, McpTransports};
pub use session::{AgentSession, PromptOutcome};
pub use terminal::TerminalManager;
