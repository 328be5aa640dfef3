//! Per-agent context builders.
//!
//! Two projections of the transcript exist: one shaped for chat-completion
//! APIs (native agents) and one as plain content blocks for the
//! external-agent protocol. Both apply the recipient's `tool_context`
//! setting to other participants' tool activity.

use rostrum_acp::ContentBlock;
use rostrum_blueprint::{Agent, ToolContext};
use rostrum_common::{FloorMessage, ToolInteraction};
use rostrum_llm::{ChatMessage, FunctionCall, ToolCall};

/// Build chat-completion messages for a native agent.
///
/// The agent's own messages become assistant messages; its own tool
/// interactions are replayed as synthetic assistant tool-calls paired
/// with tool-result messages so the provider sees a valid transcript.
/// Other participants' messages become named user messages with a tool
/// summary appended per the recipient's `tool_context`.
pub fn native_context(agent: &Agent, messages: &[FloorMessage]) -> Vec<ChatMessage> {
    let mut out = vec![ChatMessage::system(agent.prompt.clone())];

    for msg in messages {
        if msg.from_id == agent.id {
            if msg.tool_interactions.is_empty() {
                out.push(ChatMessage::assistant(msg.content.clone()));
                continue;
            }
            for (i, ti) in msg.tool_interactions.iter().enumerate() {
                let call_id = format!("call_{i}");
                let arguments =
                    serde_json::json!({"cmd": ti.command}).to_string();
                out.push(ChatMessage::assistant_tool_calls(
                    content_or_none(&msg.content),
                    vec![ToolCall {
                        id: call_id.clone(),
                        kind: "function".to_string(),
                        function: FunctionCall {
                            name: "bash".to_string(),
                            arguments,
                        },
                    }],
                ));
                out.push(ChatMessage::tool_result(call_id, ti.output.clone()));
            }
            if !msg.content.is_empty() {
                out.push(ChatMessage::assistant(msg.content.clone()));
            }
        } else {
            let mut content = msg.content.clone();
            if !msg.tool_interactions.is_empty() {
                let summary =
                    format_tool_interactions(&msg.tool_interactions, agent.tool_context);
                if !summary.is_empty() {
                    content.push_str("\n\n");
                    content.push_str(&summary);
                }
            }
            let name = msg.from_id.trim_start_matches('@');
            out.push(ChatMessage::named_user(name, content));
        }
    }

    out
}

fn content_or_none(content: &str) -> Option<String> {
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

/// Build external-agent content blocks: the system prompt, one block per
/// transcript message, then a turn marker. The agent's own tool activity
/// is always shown in full detail.
pub fn acp_context(agent: &Agent, messages: &[FloorMessage]) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    if !agent.prompt.is_empty() {
        blocks.push(ContentBlock::text(format!("[System] {}", agent.prompt)));
    }

    for msg in messages {
        let mut text = format!("{}: {}", msg.from_id, msg.content);
        if !msg.tool_interactions.is_empty() {
            let level = if msg.from_id == agent.id {
                ToolContext::Full
            } else {
                agent.tool_context
            };
            let summary = format_tool_interactions(&msg.tool_interactions, level);
            if !summary.is_empty() {
                text.push('\n');
                text.push_str(&summary);
            }
        }
        blocks.push(ContentBlock::text(text));
    }

    blocks.push(ContentBlock::text("Your turn to respond."));
    blocks
}

/// Render tool interactions at the given detail level.
///
/// `summary` shows the first line of each command (truncated to 80 chars)
/// and the first 3 lines of output; `full` shows the whole command and up
/// to 500 chars of output.
pub fn format_tool_interactions(interactions: &[ToolInteraction], level: ToolContext) -> String {
    if level == ToolContext::None || interactions.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = interactions
        .iter()
        .map(|ti| match level {
            ToolContext::Summary => {
                let first_line = ti.command.split('\n').next().unwrap_or_default();
                let cmd = truncate_chars(first_line, 80);
                let output = summarize_lines(&ti.output, 3);
                format!("$ {cmd}\n{output}")
            }
            _ => {
                let output = truncate_chars(&ti.output, 500);
                format!("$ {}\n{}", ti.command, output)
            }
        })
        .collect();

    parts.join("\n\n")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{head}...")
    }
}

fn summarize_lines(text: &str, max_lines: usize) -> String {
    let trimmed = text.trim();
    let lines: Vec<&str> = trimmed.split('\n').collect();
    if lines.len() <= max_lines {
        return trimmed.to_string();
    }
    format!(
        "{}\n... ({} more lines)",
        lines[..max_lines].join("\n"),
        lines.len() - max_lines
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rostrum_blueprint::Blueprint;
    use rostrum_llm::Role;

    fn agent(tool_context: &str) -> Agent {
        let bp = Blueprint::parse(&format!(
            r#"
name: test
agents:
  - id: "@data"
    prompt: "You are data."
    tool_context: {tool_context}
"#
        ))
        .unwrap();
        bp.agents[0].clone()
    }

    fn sample_interactions() -> Vec<ToolInteraction> {
        vec![
            ToolInteraction::new("ls -la", "file1\nfile2"),
            ToolInteraction::new("cat notes.txt", "hello"),
        ]
    }

    #[test]
    fn native_context_starts_with_system_prompt() {
        let msgs = vec![FloorMessage::user("hi")];
        let ctx = native_context(&agent("full"), &msgs);
        assert_eq!(ctx[0].role, Role::System);
        assert_eq!(ctx[0].content.as_deref(), Some("You are data."));
    }

    #[test]
    fn own_tool_interactions_replay_as_tool_calls() {
        let msgs = vec![FloorMessage::from_agent(
            "@data",
            "done",
            sample_interactions(),
        )];
        let ctx = native_context(&agent("full"), &msgs);

        // system + (tool-call + tool-result) per interaction + residual
        assert_eq!(ctx.len(), 1 + 2 * 2 + 1);

        let call_msg = &ctx[1];
        assert_eq!(call_msg.role, Role::Assistant);
        assert_eq!(call_msg.tool_calls.len(), 1);
        assert_eq!(call_msg.tool_calls[0].id, "call_0");
        assert_eq!(call_msg.tool_calls[0].function.name, "bash");
        assert!(call_msg.tool_calls[0]
            .function
            .arguments
            .contains("ls -la"));

        let result_msg = &ctx[2];
        assert_eq!(result_msg.role, Role::Tool);
        assert_eq!(result_msg.tool_call_id.as_deref(), Some("call_0"));
        assert_eq!(result_msg.content.as_deref(), Some("file1\nfile2"));

        let second_call = &ctx[3];
        assert_eq!(second_call.tool_calls[0].id, "call_1");

        let residual = ctx.last().unwrap();
        assert_eq!(residual.role, Role::Assistant);
        assert_eq!(residual.content.as_deref(), Some("done"));
        assert!(residual.tool_calls.is_empty());
    }

    #[test]
    fn no_residual_message_when_content_empty() {
        let msgs = vec![FloorMessage::from_agent(
            "@data",
            "",
            vec![ToolInteraction::new("ls", "ok")],
        )];
        let ctx = native_context(&agent("full"), &msgs);
        // system + tool-call + tool-result, no trailing assistant text
        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.last().unwrap().role, Role::Tool);
    }

    #[test]
    fn other_agents_become_named_user_messages() {
        let msgs = vec![FloorMessage::from_agent("@code", "look at this", vec![])];
        let ctx = native_context(&agent("full"), &msgs);
        let msg = &ctx[1];
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.name.as_deref(), Some("code"));
    }

    #[test]
    fn tool_context_none_omits_summaries() {
        let msgs = vec![FloorMessage::from_agent(
            "@code",
            "ran it",
            sample_interactions(),
        )];
        let ctx = native_context(&agent("none"), &msgs);
        assert_eq!(ctx[1].content.as_deref(), Some("ran it"));
    }

    #[test]
    fn tool_context_summary_truncates() {
        let long_cmd = "x".repeat(100);
        let long_out = (0..10).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let interactions = vec![ToolInteraction::new(long_cmd, long_out)];
        let summary = format_tool_interactions(&interactions, ToolContext::Summary);

        assert!(summary.contains(&format!("$ {}...", "x".repeat(80))));
        assert!(summary.contains("... (7 more lines)"));
        assert!(!summary.contains("line5"));
    }

    #[test]
    fn tool_context_full_caps_output_at_500() {
        let interactions = vec![ToolInteraction::new("cmd", "y".repeat(600))];
        let full = format_tool_interactions(&interactions, ToolContext::Full);
        assert!(full.ends_with("..."));
        assert!(full.len() < 600 + 10);
    }

    #[test]
    fn acp_context_shapes_blocks() {
        let msgs = vec![
            FloorMessage::user("hello"),
            FloorMessage::from_agent("@data", "hi back", vec![]),
        ];
        let ctx = acp_context(&agent("full"), &msgs);
        let texts: Vec<&str> = ctx
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => text.as_str(),
            })
            .collect();

        assert_eq!(texts[0], "[System] You are data.");
        assert_eq!(texts[1], "@user: hello");
        assert_eq!(texts[2], "@data: hi back");
        assert_eq!(*texts.last().unwrap(), "Your turn to respond.");
    }

    #[test]
    fn acp_context_own_tools_always_full() {
        // Recipient has tool_context none, but its own interactions show in full
        let msgs = vec![FloorMessage::from_agent(
            "@data",
            "done",
            vec![ToolInteraction::new("ls", "file1")],
        )];
        let ctx = acp_context(&agent("none"), &msgs);
        let ContentBlock::Text { text } = &ctx[1];
        assert!(text.contains("$ ls"));
        assert!(text.contains("file1"));
    }

    #[test]
    fn acp_context_skips_empty_prompt_block() {
        let mut a = agent("full");
        a.prompt = String::new();
        let ctx = acp_context(&a, &[FloorMessage::user("hi")]);
        let ContentBlock::Text { text } = &ctx[0];
        assert_eq!(text, "@user: hi");
    }

    #[test]
    fn summarize_lines_boundary() {
        assert_eq!(summarize_lines("a\nb", 3), "a\nb");
        assert_eq!(summarize_lines("a\nb\nc\nd", 3), "a\nb\nc\n... (1 more lines)");
    }
}
