//! Floor events.
//!
//! One enum covers the three traffic classes: inbound events fed to the
//! controller, outbound events the controller emits, and high-frequency
//! stream events that flow from runners straight to the frontend without
//! touching the controller.

use rostrum_common::ToolInteraction;

#[derive(Debug, Clone)]
pub enum Event {
    // --- Inbound (to controller) ---
    /// The user provided input.
    UserMessage { content: String },

    /// An agent finished its full response.
    AgentDone {
        agent_id: String,
        content: String,
        tool_interactions: Vec<ToolInteraction>,
    },

    /// An agent responded with [PASS].
    AgentPassed { agent_id: String },

    /// A runner encountered an error. `partial` holds any content
    /// produced before the failure; it is not appended to the transcript.
    AgentError {
        agent_id: String,
        error: String,
        partial: String,
    },

    /// A slash command (/quit, /clear, ...).
    UserCommand { command: String },

    // --- Outbound (from controller) ---
    /// Dispatch a runner for this agent.
    PromptAgent { agent_id: String },

    /// The turn has returned to the user.
    WaitingForUser,

    /// /clear was processed.
    ConversationCleared,

    /// /quit was processed.
    FloorStopped,

    /// Informational line (sandbox ready, agent started, errors...).
    SystemInfo { text: String },

    // --- Stream (runner → frontend, bypassing the controller) ---
    /// One token of an agent's streamed reply.
    TokenStreamed { agent_id: String, token: String },

    /// An agent started a tool call.
    ToolCallStarted { agent_id: String, title: String },

    /// A completed tool call's output.
    ToolCallResult {
        agent_id: String,
        title: String,
        output: String,
    },

    /// An agent is about to be prompted (spinner hint).
    AgentThinking { agent_id: String },

    /// Emitted before streaming begins so the frontend can print the label.
    AgentLabel { agent_id: String },
}
