//! Plain-text console frontend.
//!
//! Renders floor events to stdout and mirrors them into an optional
//! plain-text session log. ANSI escapes are stripped before anything
//! reaches the log, so colored tool output (git, test runners) cannot
//! corrupt it.

use crate::events::Event;
use crate::frontend::{Frontend, StreamSink};
use regex::Regex;
use rostrum_common::USER_ID;
use std::fs::File;
use std::io::{BufRead, Write};
use std::sync::{LazyLock, Mutex};

/// Display cap for tool output; the transcript keeps the full text.
const TOOL_OUTPUT_DISPLAY_CHARS: usize = 500;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("ansi pattern"));

/// Shared output path: stdout plus the optional log file.
pub struct Output {
    debug: bool,
    log: Mutex<Option<File>>,
}

impl Output {
    pub fn new(log_path: Option<&str>, debug: bool) -> Self {
        let log = log_path.and_then(|path| match File::create(path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("Warning: cannot open log file {path}: {e}");
                None
            }
        });
        Self {
            debug,
            log: Mutex::new(log),
        }
    }

    /// Write to both the terminal and the log.
    pub fn print(&self, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
        self.write_log(text);
    }

    /// Debug line, gated on debug mode.
    pub fn debug(&self, text: &str) {
        if !self.debug {
            return;
        }
        let line = format!("  [debug] {text}\n");
        print!("{line}");
        self.write_log(&line);
    }

    /// Log-only write, for content that reached the terminal another way
    /// (e.g. user-typed input echoed by the terminal itself).
    pub fn log_only(&self, text: &str) {
        self.write_log(text);
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Write to the log file with ANSI escapes stripped.
    fn write_log(&self, text: &str) {
        let mut guard = self.log.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ref mut file) = *guard {
            let plain = ANSI_ESCAPE.replace_all(text, "");
            let _ = file.write_all(plain.as_bytes());
        }
    }

    pub fn close(&self) {
        let mut guard = self.log.lock().unwrap_or_else(|e| e.into_inner());
        guard.take();
    }
}

/// Terminal frontend reading stdin line by line.
///
/// Clones share the same output path, so one instance can serve as both
/// the coordinator's `Frontend` and the runners' `StreamSink`.
#[derive(Clone)]
pub struct ConsoleFrontend {
    out: std::sync::Arc<Output>,
}

impl ConsoleFrontend {
    pub fn new(log_path: Option<&str>, debug: bool) -> Self {
        Self {
            out: std::sync::Arc::new(Output::new(log_path, debug)),
        }
    }

    pub fn debug_line(&self, text: &str) {
        self.out.debug(text);
    }
}

impl Frontend for ConsoleFrontend {
    fn render(&self, event: &Event) {
        match event {
            Event::SystemInfo { text } => self.out.print(&format!("[System]: {text}\n")),
            Event::ConversationCleared => self.out.print("[Conversation cleared]\n"),
            Event::AgentDone { .. } => self.out.print("\n"),
            Event::AgentPassed { agent_id } => {
                self.out.print(&format!("[{agent_id}]: [PASS]\n"));
            }
            Event::AgentError { agent_id, error, .. } => {
                self.out.print(&format!("[{agent_id}]: [ERROR: {error}]\n"));
            }
            Event::FloorStopped => self.out.print("\nGoodbye.\n"),
            // The label event covers the speaker line; a spinner needs a
            // screen-owning frontend
            Event::AgentThinking { .. } => {}
            // ReadInput shows the prompt; dispatch is the coordinator's job
            Event::WaitingForUser | Event::PromptAgent { .. } => {}
            _ => {}
        }
    }

    fn read_input(&mut self) -> Option<Event> {
        loop {
            self.out.print(&format!("\n[{USER_ID}]: "));

            let mut line = String::new();
            let stdin = std::io::stdin();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => {
                    self.out.print("[end of input]\n");
                    return None;
                }
                Ok(_) => {}
            }

            let text = line.trim();
            self.out.log_only(&format!("{text}\n"));

            if text.is_empty() {
                continue;
            }
            if text.starts_with('/') {
                return Some(Event::UserCommand {
                    command: text.to_string(),
                });
            }
            return Some(Event::UserMessage {
                content: text.to_string(),
            });
        }
    }

    fn close(&self) {
        self.out.close();
    }
}

impl StreamSink for ConsoleFrontend {
    fn on_stream(&self, event: Event) {
        match event {
            Event::AgentLabel { agent_id } => {
                self.out.print(&format!("\n[{agent_id}]: "));
            }
            Event::TokenStreamed { token, .. } => self.out.print(&token),
            Event::ToolCallStarted { title, .. } => {
                self.out.print(&format!("\n  > {title}\n"));
            }
            Event::ToolCallResult { output, .. } => {
                if !output.is_empty() {
                    let display = truncate_for_display(&output);
                    self.out.print(&format!("  {display}\n"));
                }
            }
            _ => {}
        }
    }
}

fn truncate_for_display(output: &str) -> String {
    if output.chars().count() <= TOOL_OUTPUT_DISPLAY_CHARS {
        return output.to_string();
    }
    let head: String = output.chars().take(TOOL_OUTPUT_DISPLAY_CHARS).collect();
    format!("{head}...")
}
