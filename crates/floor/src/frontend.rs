//! Frontend and stream-sink seams.
//!
//! The coordinator talks to the user through these two traits. A plain
//! console implementation lives in [`crate::console`]; richer frontends
//! (TUI, web) are external collaborators that implement the same seams.

use crate::events::Event;

/// Renders floor events and produces user input.
pub trait Frontend: Send {
    /// Display an event to the user.
    fn render(&self, event: &Event);

    /// Block until the user provides input. Returns a `UserMessage` or
    /// `UserCommand` event, or `None` on end-of-input.
    fn read_input(&mut self) -> Option<Event>;

    /// Release resources (close the log file, etc.).
    fn close(&self);
}

/// Receives high-frequency streaming events from agent runners.
///
/// Separated from [`Frontend`] because runners hand it to background
/// tasks; a console frontend implements both.
pub trait StreamSink: Send + Sync {
    fn on_stream(&self, event: Event);
}
