//! Agent runners.
//!
//! A runner converts one `PromptAgent` event into a streamed reply and a
//! terminal event (`AgentDone`, `AgentPassed`, or `AgentError`). Runners
//! never panic upward: every path produces a terminal event.

use crate::events::Event;
use crate::frontend::StreamSink;
use rostrum_acp::{AgentSession, ContentBlock, PromptHooks};
use rostrum_blueprint::Agent;
use rostrum_common::ToolInteraction;
use rostrum_furniture::{Args, Furniture};
use rostrum_llm::{bash_tool, ChatClient, ChatMessage, Tool, ToolCall};
use rostrum_sandbox::Sandbox;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_TOOL_ITERATIONS: usize = 10;

/// Case-insensitive substring test for the pass token.
pub fn contains_pass(content: &str) -> bool {
    content.to_lowercase().contains("[pass]")
}

/// One tool call with its result, ready for the message history.
struct ExpandedCall {
    call: ToolCall,
    title: String,
    output: String,
}

/// Executes one native-agent turn against a chat-completion endpoint.
pub struct LlmRunner {
    pub sandbox: Option<Arc<Sandbox>>,
    /// Furniture accessible to this agent, keyed by name
    pub furniture: HashMap<String, Arc<dyn Furniture>>,
    pub stream: Arc<dyn StreamSink>,
}

impl LlmRunner {
    /// Call the endpoint, handling tool calls, until the agent stops
    /// asking for tools (or the iteration cap is hit). Blocks until done.
    pub async fn run(&self, agent: &Agent, mut messages: Vec<ChatMessage>) -> Event {
        let client = ChatClient::new(&agent.endpoint, None);
        let tools = self.build_tools(agent);

        let mut full_response = String::new();
        let mut interactions: Vec<ToolInteraction> = Vec::new();

        self.stream.on_stream(Event::AgentLabel {
            agent_id: agent.id.clone(),
        });

        for _ in 0..MAX_TOOL_ITERATIONS {
            let stream = &self.stream;
            let agent_id = agent.id.clone();
            let mut on_token = |token: &str| {
                stream.on_stream(Event::TokenStreamed {
                    agent_id: agent_id.clone(),
                    token: token.to_string(),
                });
            };

            let result = match client
                .chat_stream(&agent.model, &messages, agent.temperature, &tools, &mut on_token)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    return Event::AgentError {
                        agent_id: agent.id.clone(),
                        error: e.to_string(),
                        partial: full_response,
                    };
                }
            };

            full_response.push_str(&result.content);

            if result.tool_calls.is_empty() {
                break;
            }

            for tool_call in result.tool_calls {
                for ex in self.dispatch_tool_call(&agent.id, tool_call).await {
                    interactions.push(ToolInteraction::new(ex.title, ex.output.clone()));
                    messages.push(ChatMessage::assistant_tool_calls(None, vec![ex.call.clone()]));
                    messages.push(ChatMessage::tool_result(ex.call.id, ex.output));
                }
            }
        }

        if contains_pass(&full_response) {
            return Event::AgentPassed {
                agent_id: agent.id.clone(),
            };
        }

        Event::AgentDone {
            agent_id: agent.id.clone(),
            content: full_response,
            tool_interactions: interactions,
        }
    }

    /// The tool catalog for this agent: bash (when tools + sandbox are
    /// available) plus every tool of every accessible furniture, namespaced
    /// as `{furniture}__{tool}` for uniqueness across collections.
    fn build_tools(&self, agent: &Agent) -> Vec<Tool> {
        let mut tools = Vec::new();
        if agent.can_use_tools && self.sandbox.is_some() {
            tools.push(bash_tool());
        }
        for fname in &agent.furniture {
            let Some(furniture) = self.furniture.get(fname) else {
                continue;
            };
            for spec in furniture.tools() {
                tools.push(Tool::function(
                    format!("{fname}__{}", spec.name),
                    format!("[{fname}] {}", spec.description),
                    spec.parameters,
                ));
            }
        }
        tools
    }

    /// Execute one provider tool call. Returns one expanded call per
    /// argument object; more than one when the provider concatenated
    /// the arguments of several calls into a single string.
    async fn dispatch_tool_call(&self, agent_id: &str, tool_call: ToolCall) -> Vec<ExpandedCall> {
        let name = tool_call.function.name.clone();

        if let Some((fname, tname)) = name.split_once("__") {
            return self.dispatch_furniture_call(agent_id, fname, tname, tool_call).await;
        }

        if name == "bash" {
            return self.dispatch_bash_call(agent_id, tool_call).await;
        }

        warn!(tool = %name, "Agent called an unknown tool");
        vec![ExpandedCall {
            title: name.clone(),
            output: format!("[ERROR: unknown tool {name:?}]"),
            call: tool_call,
        }]
    }

    async fn dispatch_furniture_call(
        &self,
        agent_id: &str,
        fname: &str,
        tname: &str,
        tool_call: ToolCall,
    ) -> Vec<ExpandedCall> {
        let title = format!("{fname}.{tname}");

        let Some(furniture) = self.furniture.get(fname) else {
            return vec![ExpandedCall {
                title: name_title(&tool_call),
                output: format!("[ERROR: unknown furniture {fname:?}]"),
                call: tool_call,
            }];
        };

        // Some providers concatenate several calls' argument objects into
        // one string; decode them as a sequence and invoke once per object.
        let args_list = match parse_json_objects(&tool_call.function.arguments) {
            Ok(list) => list,
            Err(e) => {
                return vec![ExpandedCall {
                    title,
                    output: format!("[ERROR: invalid arguments: {e}]"),
                    call: tool_call,
                }];
            }
        };

        let mut expanded = Vec::new();
        for (i, args) in args_list.into_iter().enumerate() {
            self.stream.on_stream(Event::ToolCallStarted {
                agent_id: agent_id.to_string(),
                title: title.clone(),
            });

            let output = match furniture.call(tname, args.clone()).await {
                Ok(value) => serde_json::to_string(&value).unwrap_or_else(|_| value.to_string()),
                Err(e) => format!("[ERROR: {e}]"),
            };

            self.stream.on_stream(Event::ToolCallResult {
                agent_id: agent_id.to_string(),
                title: title.clone(),
                output: output.clone(),
            });

            // Rebuild the call with single-object arguments and a unique id
            // so the provider accepts the transcript on the next iteration.
            let mut call = tool_call.clone();
            call.function.arguments =
                serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string());
            if i > 0 {
                call.id = format!("{}_{i}", tool_call.id);
            }

            expanded.push(ExpandedCall {
                call,
                title: title.clone(),
                output,
            });
        }
        expanded
    }

    async fn dispatch_bash_call(&self, agent_id: &str, tool_call: ToolCall) -> Vec<ExpandedCall> {
        let Some(ref sandbox) = self.sandbox else {
            return vec![ExpandedCall {
                title: "bash".to_string(),
                output: "[ERROR: no sandbox available]".to_string(),
                call: tool_call,
            }];
        };

        #[derive(serde::Deserialize)]
        struct BashArgs {
            cmd: String,
        }
        let cmd = match serde_json::from_str::<BashArgs>(&tool_call.function.arguments) {
            Ok(args) => args.cmd,
            // Lenient fallback: some models emit the bare command string
            Err(_) => tool_call.function.arguments.clone(),
        };

        self.stream.on_stream(Event::ToolCallStarted {
            agent_id: agent_id.to_string(),
            title: cmd.clone(),
        });

        let output = match sandbox.execute(&cmd).await {
            Ok(output) => output,
            Err(e) => format!("[ERROR: {e}]"),
        };

        self.stream.on_stream(Event::ToolCallResult {
            agent_id: agent_id.to_string(),
            title: cmd.clone(),
            output: output.clone(),
        });

        vec![ExpandedCall {
            title: cmd,
            output,
            call: tool_call,
        }]
    }
}

fn name_title(tool_call: &ToolCall) -> String {
    tool_call.function.name.clone()
}

/// Decode one or more concatenated JSON objects from an argument string.
/// An empty string decodes to a single empty object.
fn parse_json_objects(s: &str) -> std::result::Result<Vec<Args>, serde_json::Error> {
    let mut results = Vec::new();
    for item in serde_json::Deserializer::from_str(s).into_iter::<Args>() {
        results.push(item?);
    }
    if results.is_empty() {
        results.push(Args::new());
    }
    Ok(results)
}

/// Executes one external-agent turn through its session.
pub struct AcpRunner<'a> {
    pub sessions: &'a HashMap<String, Arc<AgentSession>>,
    pub stream: Arc<dyn StreamSink>,
}

impl AcpRunner<'_> {
    /// Send the prompt blocks and collect the streamed response. Blocks
    /// until the agent finishes its turn.
    pub async fn run(&self, agent: &Agent, blocks: Vec<ContentBlock>) -> Event {
        let Some(session) = self.sessions.get(&agent.id) else {
            return Event::AgentError {
                agent_id: agent.id.clone(),
                error: format!("no agent session for {}", agent.id),
                partial: String::new(),
            };
        };

        let hooks = {
            let stream = Arc::clone(&self.stream);
            let agent_id = agent.id.clone();
            let on_token = {
                let stream = Arc::clone(&stream);
                let agent_id = agent_id.clone();
                Box::new(move |token: &str| {
                    stream.on_stream(Event::TokenStreamed {
                        agent_id: agent_id.clone(),
                        token: token.to_string(),
                    });
                })
            };
            let on_tool_call = {
                let stream = Arc::clone(&stream);
                let agent_id = agent_id.clone();
                Box::new(move |title: &str| {
                    stream.on_stream(Event::ToolCallStarted {
                        agent_id: agent_id.clone(),
                        title: title.to_string(),
                    });
                })
            };
            let on_tool_result = Box::new(move |title: &str, output: &str| {
                stream.on_stream(Event::ToolCallResult {
                    agent_id: agent_id.clone(),
                    title: title.to_string(),
                    output: output.to_string(),
                });
            });
            PromptHooks {
                on_token,
                on_tool_call,
                on_tool_result,
            }
        };

        self.stream.on_stream(Event::AgentLabel {
            agent_id: agent.id.clone(),
        });

        debug!(agent = %agent.id, blocks = blocks.len(), "External-agent prompt");

        match session.prompt(blocks, hooks).await {
            Ok(outcome) => {
                if contains_pass(&outcome.content) {
                    Event::AgentPassed {
                        agent_id: agent.id.clone(),
                    }
                } else {
                    Event::AgentDone {
                        agent_id: agent.id.clone(),
                        content: outcome.content,
                        tool_interactions: outcome.interactions,
                    }
                }
            }
            Err(e) => Event::AgentError {
                agent_id: agent.id.clone(),
                error: format!("prompt failed: {e}"),
                partial: session.partial_text(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rostrum_blueprint::Blueprint;
    use rostrum_furniture::TaskBoard;

    struct NullSink;
    impl StreamSink for NullSink {
        fn on_stream(&self, _event: Event) {}
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            kind: "function".to_string(),
            function: rostrum_llm::FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    fn runner_with_board() -> LlmRunner {
        let mut furniture: HashMap<String, Arc<dyn Furniture>> = HashMap::new();
        furniture.insert("tasks".to_string(), Arc::new(TaskBoard::new()));
        LlmRunner {
            sandbox: None,
            furniture,
            stream: Arc::new(NullSink),
        }
    }

    #[test]
    fn pass_token_is_case_insensitive_substring() {
        assert!(contains_pass("[PASS]"));
        assert!(contains_pass("I'll sit this one out. [pass]"));
        assert!(contains_pass("prefix [PaSs] suffix"));
        assert!(!contains_pass("pass"));
        assert!(!contains_pass("no signal here"));
    }

    #[test]
    fn parse_json_objects_splits_concatenated() {
        let objs = parse_json_objects(r#"{"title":"a"}{"title":"b"}"#).unwrap();
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[0]["title"], "a");
        assert_eq!(objs[1]["title"], "b");
    }

    #[test]
    fn parse_json_objects_single_and_empty() {
        let objs = parse_json_objects(r#"{"x":1}"#).unwrap();
        assert_eq!(objs.len(), 1);

        let objs = parse_json_objects("").unwrap();
        assert_eq!(objs.len(), 1);
        assert!(objs[0].is_empty());
    }

    #[test]
    fn parse_json_objects_rejects_garbage() {
        assert!(parse_json_objects("{broken").is_err());
    }

    #[tokio::test]
    async fn concatenated_furniture_calls_get_unique_ids() {
        let runner = runner_with_board();
        let call = tool_call(
            "call_x",
            "tasks__add_task",
            r#"{"title":"first"}{"title":"second"}"#,
        );
        let expanded = runner.dispatch_tool_call("@data", call).await;

        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0].call.id, "call_x");
        assert_eq!(expanded[1].call.id, "call_x_1");
        // Each rebuilt call carries a single valid JSON object
        assert_eq!(expanded[0].call.function.arguments, r#"{"title":"first"}"#);
        assert!(expanded[0].output.contains("\"id\":1"));
        assert!(expanded[1].output.contains("\"id\":2"));
    }

    #[tokio::test]
    async fn furniture_errors_are_recorded_not_fatal() {
        let runner = runner_with_board();
        let call = tool_call("c1", "tasks__get_task", r#"{"id": 99}"#);
        let expanded = runner.dispatch_tool_call("@data", call).await;
        assert_eq!(expanded.len(), 1);
        assert!(expanded[0].output.starts_with("[ERROR:"));
    }

    #[tokio::test]
    async fn unknown_tool_name_is_an_error_output() {
        let runner = runner_with_board();
        let call = tool_call("c1", "teleport", "{}");
        let expanded = runner.dispatch_tool_call("@data", call).await;
        assert_eq!(expanded[0].output, "[ERROR: unknown tool \"teleport\"]");
    }

    #[tokio::test]
    async fn unknown_furniture_is_an_error_output() {
        let runner = runner_with_board();
        let call = tool_call("c1", "cabinet__open", "{}");
        let expanded = runner.dispatch_tool_call("@data", call).await;
        assert!(expanded[0].output.contains("unknown furniture"));
    }

    #[tokio::test]
    async fn bash_without_sandbox_is_an_error_output() {
        let runner = runner_with_board();
        let call = tool_call("c1", "bash", r#"{"cmd":"ls"}"#);
        let expanded = runner.dispatch_tool_call("@data", call).await;
        assert_eq!(expanded[0].output, "[ERROR: no sandbox available]");
    }

    #[test]
    fn tool_catalog_namespaces_furniture() {
        let bp = Blueprint::parse(
            r#"
name: test
agents:
  - id: "@data"
    can_use_tools: true
    furniture: [tasks, missing]
"#,
        )
        .unwrap();
        let runner = runner_with_board();
        let tools = runner.build_tools(&bp.agents[0]);

        // No sandbox → no bash; missing furniture skipped
        let names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "tasks__list_tasks",
                "tasks__add_task",
                "tasks__update_task",
                "tasks__get_task"
            ]
        );
        assert!(tools[0].function.description.starts_with("[tasks]"));
    }

    #[tokio::test]
    async fn acp_runner_without_session_errors() {
        let sessions = HashMap::new();
        let runner = AcpRunner {
            sessions: &sessions,
            stream: Arc::new(NullSink),
        };
        let bp = Blueprint::parse(
            r#"
name: test
agents:
  - id: "@ext"
    kind: external
    command: whatever
"#,
        )
        .unwrap();
        let event = runner.run(&bp.agents[0], vec![]).await;
        match event {
            Event::AgentError { agent_id, error, .. } => {
                assert_eq!(agent_id, "@ext");
                assert!(error.contains("no agent session"));
            }
            other => panic!("expected AgentError, got {other:?}"),
        }
    }
}
