//! Floor-level message types shared across the workspace.

use serde::{Deserialize, Serialize};

/// The reserved participant id for the human.
pub const USER_ID: &str = "@user";

/// One tool call and its result, as recorded on the floor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInteraction {
    /// The command or tool title as the agent issued it
    pub command: String,

    /// The full output, untruncated
    pub output: String,
}

impl ToolInteraction {
    pub fn new(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output: output.into(),
        }
    }
}

/// A message on the floor transcript (distinct from the chat-API message
/// types in `rostrum-llm`, which are shaped for the provider wire format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloorMessage {
    /// Participant id, e.g. "@user", "@data"
    pub from_id: String,

    /// The text content
    pub content: String,

    /// Tool calls made during this turn, in execution order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_interactions: Vec<ToolInteraction>,
}

impl FloorMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            from_id: USER_ID.to_string(),
            content: content.into(),
            tool_interactions: Vec::new(),
        }
    }

    pub fn from_agent(
        from_id: impl Into<String>,
        content: impl Into<String>,
        tool_interactions: Vec<ToolInteraction>,
    ) -> Self {
        Self {
            from_id: from_id.into(),
            content: content.into(),
            tool_interactions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_reserved_id() {
        let msg = FloorMessage::user("hello");
        assert_eq!(msg.from_id, USER_ID);
        assert!(msg.tool_interactions.is_empty());
    }

    #[test]
    fn floor_message_serialization_roundtrip() {
        let msg = FloorMessage::from_agent(
            "@data",
            "done",
            vec![ToolInteraction::new("ls -la", "file1\nfile2")],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: FloorMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.from_id, "@data");
        assert_eq!(back.tool_interactions.len(), 1);
        assert_eq!(back.tool_interactions[0].command, "ls -la");
    }

    #[test]
    fn empty_interactions_omitted_from_json() {
        let msg = FloorMessage::user("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_interactions"));
    }
}
