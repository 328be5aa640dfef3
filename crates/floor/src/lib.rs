//! Floor control: the turn-taking controller, agent runners, and the
//! coordinator that wires them to a frontend.
//!
//! The controller is a pure state machine over the transcript; all I/O
//! and concurrency live in the coordinator and the runners. See the
//! crate-level pieces:
//!
//! - [`controller`] - who speaks next (mentions, call stack, pass set)
//! - [`context`] - per-agent projections of the transcript
//! - [`runner`] - native (chat-completion) and external-agent runners
//! - [`coordinator`] - resource ownership and the main loop
//! - [`console`] - the plain-text frontend

pub mod console;
pub mod context;
pub mod controller;
pub mod coordinator;
pub mod events;
pub mod frontend;
pub mod runner;

pub use console::ConsoleFrontend;
pub use controller::{extract_mentions, Controller, Frame};
pub use coordinator::Coordinator;
pub use events::Event;
pub use frontend::{Frontend, StreamSink};
