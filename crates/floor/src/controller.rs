//! The turn-taking controller.
//!
//! The controller is the pure-logic heart of the floor. It receives
//! events, updates the transcript, call stack, and pass-exclusion set,
//! and returns outbound events. It performs no I/O and holds no locks;
//! the coordinator serializes events into it one at a time.

use crate::events::Event;
use regex::Regex;
use rostrum_blueprint::{Activation, Agent, Blueprint};
use rostrum_common::{FloorMessage, ToolInteraction, USER_ID};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(\w+)\?").expect("mention pattern"));

/// Extract routing mentions (`@name?`) from message content. Plain
/// `@name` without the trailing `?` is informational and not returned.
pub fn extract_mentions(content: &str) -> Vec<String> {
    MENTION
        .captures_iter(content)
        .map(|caps| format!("@{}", &caps[1]))
        .collect()
}

/// One level in the delegation chain: `caller` asked `callee` via `@mention?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub caller: String,
    pub callee: String,
}

pub struct Controller {
    blueprint: Arc<Blueprint>,
    pub messages: Vec<FloorMessage>,
    pub call_stack: Vec<Frame>,
    passed_agents: HashSet<String>,
}

impl Controller {
    pub fn new(blueprint: Arc<Blueprint>) -> Self {
        Self {
            blueprint,
            messages: Vec::new(),
            call_stack: Vec::new(),
            passed_agents: HashSet::new(),
        }
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.blueprint.agent(id)
    }

    /// Process one inbound event, returning zero or more outbound events.
    pub fn handle_event(&mut self, event: Event) -> Vec<Event> {
        match event {
            Event::UserMessage { content } => self.handle_user_message(content),
            Event::AgentDone {
                agent_id,
                content,
                tool_interactions,
            } => self.handle_agent_done(agent_id, content, tool_interactions),
            Event::AgentPassed { agent_id } => self.handle_agent_passed(agent_id),
            Event::AgentError {
                agent_id, error, ..
            } => self.handle_agent_error(agent_id, error),
            Event::UserCommand { command } => self.handle_user_command(command),
            // Outbound and stream events fed back in are a no-op.
            _ => Vec::new(),
        }
    }

    fn handle_user_message(&mut self, content: String) -> Vec<Event> {
        self.messages.push(FloorMessage::user(content));
        self.call_stack.clear();
        self.passed_agents.clear();
        self.advance_turn()
    }

    fn handle_agent_done(
        &mut self,
        agent_id: String,
        content: String,
        tool_interactions: Vec<ToolInteraction>,
    ) -> Vec<Event> {
        self.messages
            .push(FloorMessage::from_agent(agent_id, content, tool_interactions));
        self.passed_agents.clear();
        self.advance_turn()
    }

    fn handle_agent_passed(&mut self, agent_id: String) -> Vec<Event> {
        // Pop only when the passing agent is the callee on top of stack
        if self
            .call_stack
            .last()
            .is_some_and(|frame| frame.callee == agent_id)
        {
            self.call_stack.pop();
        }
        self.passed_agents.insert(agent_id);
        self.advance_turn()
    }

    fn handle_agent_error(&mut self, agent_id: String, error: String) -> Vec<Event> {
        vec![
            Event::SystemInfo {
                text: format!("[ERROR from {agent_id}: {error}]"),
            },
            Event::WaitingForUser,
        ]
    }

    fn handle_user_command(&mut self, command: String) -> Vec<Event> {
        match command.as_str() {
            "/quit" => vec![Event::FloorStopped],
            "/clear" => {
                self.messages.clear();
                self.call_stack.clear();
                self.passed_agents.clear();
                vec![Event::ConversationCleared]
            }
            other => vec![Event::SystemInfo {
                text: format!("Unknown command: {other}"),
            }],
        }
    }

    fn advance_turn(&mut self) -> Vec<Event> {
        match self.next_recipient() {
            Some(agent_id) => vec![Event::PromptAgent { agent_id }],
            None => vec![Event::WaitingForUser],
        }
    }

    /// Resolve who speaks next. `None` means the turn returns to the user.
    fn next_recipient(&mut self) -> Option<String> {
        let last = self.messages.last()?.clone();
        let mentions = extract_mentions(&last.content);
        debug!(
            from = %last.from_id,
            ?mentions,
            excluded = ?self.passed_agents,
            stack = self.call_stack.len(),
            "Resolving next speaker"
        );

        // 1. An agent addressing @user? pauses for the user
        if last.from_id != USER_ID && mentions.iter().any(|m| m == USER_ID) {
            debug!("Pausing for @user");
            return None;
        }

        // 2. Explicit mention: push a frame and wake the mentioned agent
        // (blueprint order breaks ties)
        for agent in &self.blueprint.agents {
            if self.passed_agents.contains(&agent.id) {
                continue;
            }
            if mentions
                .iter()
                .any(|m| *m == agent.id && *m != last.from_id)
            {
                self.call_stack.push(Frame {
                    caller: last.from_id.clone(),
                    callee: agent.id.clone(),
                });
                debug!(callee = %agent.id, stack = self.call_stack.len(), "Mention pushed frame");
                return Some(agent.id.clone());
            }
        }

        // 3. No mention: pop the call stack, returning control to the caller
        if let Some(frame) = self.call_stack.pop() {
            debug!(caller = %frame.caller, callee = %frame.callee, "Popped frame");
            if frame.caller == USER_ID {
                return None;
            }
            if !self.passed_agents.contains(&frame.caller)
                && self.blueprint.agent(&frame.caller).is_some()
            {
                return Some(frame.caller);
            }
            // Caller gone or excluded: fall through to activation polling
        }

        // 4. Wake the first always-on agent that didn't author the message
        for agent in &self.blueprint.agents {
            if self.passed_agents.contains(&agent.id) {
                continue;
            }
            if agent.id != last.from_id && agent.activation == Activation::Always {
                debug!(agent = %agent.id, "Waking always-on agent");
                return Some(agent.id.clone());
            }
        }

        // 5. Nobody: back to the user
        debug!("Back to user");
        None
    }
}
