//! The coordinator wires the controller, runners, and frontend together.
//!
//! It owns the process-level resources (sandbox, external-agent sessions,
//! furniture registry, tool-protocol server) and the main loop. Exactly
//! one inbound event is in flight at a time; the controller itself stays
//! lock-free.

use crate::context;
use crate::controller::Controller;
use crate::events::Event;
use crate::frontend::{Frontend, StreamSink};
use crate::runner::{AcpRunner, LlmRunner};
use rostrum_acp::{AgentSession, ClientHandler, McpServerDescriptor, McpTransports};
use rostrum_api::ApiServer;
use rostrum_blueprint::{Agent, AgentKind, Blueprint};
use rostrum_common::{Result, RostrumError, USER_ID};
use rostrum_furniture::{ExternalMcp, Furniture, FurnitureRegistry, TaskBoard};
use rostrum_sandbox::Sandbox;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Coordinator {
    controller: Controller,
    frontend: Box<dyn Frontend>,
    stream: Arc<dyn StreamSink>,
    blueprint: Arc<Blueprint>,
    floor_slug: String,
    workspace_dir: PathBuf,
    sandbox: Option<Arc<Sandbox>>,
    sessions: HashMap<String, Arc<AgentSession>>,
    furniture: FurnitureRegistry,
    adapters: Vec<Arc<ExternalMcp>>,
    api: Option<ApiServer>,
}

impl Coordinator {
    pub fn new(
        blueprint: Arc<Blueprint>,
        frontend: Box<dyn Frontend>,
        stream: Arc<dyn StreamSink>,
    ) -> Self {
        let floor_slug = slugify(&blueprint.name);
        Self {
            controller: Controller::new(Arc::clone(&blueprint)),
            frontend,
            stream,
            blueprint,
            floor_slug,
            workspace_dir: PathBuf::from("./workspace"),
            sandbox: None,
            sessions: HashMap::new(),
            furniture: FurnitureRegistry::new(),
            adapters: Vec::new(),
            api: None,
        }
    }

    /// Bring up sandbox, furniture, tool-protocol server, and
    /// external-agent sessions. Tears down partial state on failure.
    pub async fn start(&mut self) -> Result<()> {
        if let Err(e) = self.start_inner().await {
            self.stop().await;
            return Err(e);
        }
        Ok(())
    }

    async fn start_inner(&mut self) -> Result<()> {
        let cwd = std::env::current_dir()?;
        self.workspace_dir = cwd.join("workspace");
        std::fs::create_dir_all(&self.workspace_dir)?;

        // 1. Sandbox, when the blueprint declares one
        if let Some(ws) = self.blueprint.sandbox_workstation().cloned() {
            self.render(Event::SystemInfo {
                text: "Starting sandbox...".to_string(),
            });
            let sandbox = Sandbox::new(&self.workspace_dir, ws.image, ws.dockerfile);
            sandbox.start().await?;
            self.render(Event::SystemInfo {
                text: format!("Sandbox ready ({})", sandbox.container_id()),
            });
            self.sandbox = Some(Arc::new(sandbox));
        }

        // 2. Furniture registry
        let furniture_defs = self.blueprint.furniture.clone();
        for def in &furniture_defs {
            let furniture: Arc<dyn Furniture> = match def.r#type.as_str() {
                "taskboard" | "" => Arc::new(TaskBoard::new()),
                "mcp" => {
                    let adapter = if !def.command.is_empty() {
                        ExternalMcp::connect_stdio(
                            &def.name,
                            &def.command[0],
                            &def.command[1..],
                        )
                        .await?
                    } else if !def.url.is_empty() {
                        ExternalMcp::connect_http(&def.name, &def.url).await?
                    } else {
                        return Err(RostrumError::Blueprint(format!(
                            "mcp furniture {:?} needs a command or url",
                            def.name
                        )));
                    };
                    let adapter = Arc::new(adapter);
                    self.adapters.push(Arc::clone(&adapter));
                    adapter
                }
                other => {
                    return Err(RostrumError::Blueprint(format!(
                        "unknown furniture type {other:?} for {:?}",
                        def.name
                    )));
                }
            };
            self.furniture.insert(def.name.clone(), furniture);
        }

        // 3. Tool-protocol server, once there is furniture to expose
        if !self.furniture.is_empty() {
            let api = ApiServer::new();
            for (name, furniture) in &self.furniture {
                api.register_furniture(&self.floor_slug, name, Arc::clone(furniture));
            }
            api.start("127.0.0.1:0").await?;
            self.render(Event::SystemInfo {
                text: format!("Furniture endpoints at {}", api.base_url()),
            });
            self.api = Some(api);
        }

        // 4. External-agent sessions
        for agent in self.blueprint.agents.clone() {
            if agent.kind != AgentKind::External {
                continue;
            }
            self.render(Event::SystemInfo {
                text: format!("Starting external agent {} ({})...", agent.id, agent.command),
            });

            let client = Arc::new(ClientHandler::new(
                self.sandbox.clone(),
                &self.workspace_dir,
            ));
            let session = AgentSession::spawn(&agent.command, &agent.args, &agent.env, client)?;
            session.initialize().await.map_err(|e| {
                session.close();
                RostrumError::Acp(format!("initialize agent {}: {e}", agent.id))
            })?;

            let servers = self.server_descriptors(&agent, session.transports());
            let workspace = self.workspace_dir.display().to_string();
            session
                .new_session(&workspace, &servers)
                .await
                .map_err(|e| {
                    session.close();
                    RostrumError::Acp(format!("create session for agent {}: {e}", agent.id))
                })?;

            self.sessions.insert(agent.id.clone(), Arc::new(session));
            self.render(Event::SystemInfo {
                text: format!("External agent {} ready", agent.id),
            });
        }

        Ok(())
    }

    /// Tool-protocol server descriptors for one agent, choosing each
    /// transport by intersecting the agent's declared transports with
    /// ours. SSE wins where both sides offer it.
    fn server_descriptors(
        &self,
        agent: &Agent,
        transports: McpTransports,
    ) -> Vec<McpServerDescriptor> {
        let Some(ref api) = self.api else {
            return Vec::new();
        };
        agent
            .furniture
            .iter()
            .filter(|name| self.furniture.contains_key(*name))
            .filter_map(|name| {
                if transports.sse {
                    Some(McpServerDescriptor::sse(
                        name,
                        api.sse_url(&self.floor_slug, name),
                    ))
                } else if transports.http {
                    Some(McpServerDescriptor::http(
                        name,
                        api.mcp_url(&self.floor_slug, name),
                    ))
                } else {
                    warn!(agent = %agent.id, furniture = %name, "Agent accepts no tool-protocol transport");
                    None
                }
            })
            .collect()
    }

    /// Tear down resources in reverse start order. Safe to call twice.
    pub async fn stop(&mut self) {
        for (id, session) in self.sessions.drain() {
            info!(agent = %id, "Closing agent session");
            session.close();
        }
        if let Some(api) = self.api.take() {
            api.stop();
        }
        for adapter in self.adapters.drain(..) {
            adapter.close().await;
        }
        if let Some(sandbox) = self.sandbox.take() {
            sandbox.stop().await;
        }
    }

    /// The main loop. With an initial prompt, processes that single user
    /// message and exits at the next return to the user (one-shot mode).
    pub async fn run(&mut self, initial_prompt: Option<String>) -> Result<()> {
        self.start().await?;
        self.render_header();

        match initial_prompt {
            Some(prompt) => {
                // Echo the prompt as if the user had typed it
                self.stream.on_stream(Event::AgentLabel {
                    agent_id: USER_ID.to_string(),
                });
                self.stream.on_stream(Event::TokenStreamed {
                    agent_id: USER_ID.to_string(),
                    token: format!("{prompt}\n"),
                });
                let events = self.controller.handle_event(Event::UserMessage {
                    content: prompt,
                });
                self.process_events(events).await;
            }
            None => loop {
                let Some(event) = self.frontend.read_input() else {
                    break;
                };
                let events = self.controller.handle_event(event);
                if self.process_events(events).await {
                    break;
                }
            },
        }

        self.stop().await;
        self.frontend.close();
        Ok(())
    }

    /// Handle controller output. For `PromptAgent`, dispatch the runner
    /// and feed its terminal event back into the controller, depth-first.
    /// Returns true when the floor should stop.
    async fn process_events(&mut self, events: Vec<Event>) -> bool {
        let mut queue: VecDeque<Event> = events.into();
        while let Some(event) = queue.pop_front() {
            self.frontend.render(&event);

            match event {
                Event::PromptAgent { agent_id } => {
                    self.frontend.render(&Event::AgentThinking {
                        agent_id: agent_id.clone(),
                    });
                    let result = self.run_agent(&agent_id).await;
                    self.frontend.render(&result);
                    let next = self.controller.handle_event(result);
                    for (i, e) in next.into_iter().enumerate() {
                        queue.insert(i, e);
                    }
                }
                Event::FloorStopped => return true,
                _ => {}
            }
        }
        false
    }

    /// Dispatch the right runner for one agent turn.
    async fn run_agent(&mut self, agent_id: &str) -> Event {
        let Some(agent) = self.controller.agent(agent_id).cloned() else {
            return Event::AgentError {
                agent_id: agent_id.to_string(),
                error: format!("unknown agent {agent_id}"),
                partial: String::new(),
            };
        };

        match agent.kind {
            AgentKind::External => {
                let runner = AcpRunner {
                    sessions: &self.sessions,
                    stream: Arc::clone(&self.stream),
                };
                let blocks = context::acp_context(&agent, &self.controller.messages);
                runner.run(&agent, blocks).await
            }
            AgentKind::Native => {
                let furniture: HashMap<String, Arc<dyn Furniture>> = agent
                    .furniture
                    .iter()
                    .filter_map(|name| {
                        self.furniture
                            .get(name)
                            .map(|f| (name.clone(), Arc::clone(f)))
                    })
                    .collect();
                let runner = LlmRunner {
                    sandbox: self.sandbox.clone(),
                    furniture,
                    stream: Arc::clone(&self.stream),
                };
                let messages = context::native_context(&agent, &self.controller.messages);
                runner.run(&agent, messages).await
            }
        }
    }

    fn render(&self, event: Event) {
        self.frontend.render(&event);
    }

    fn render_header(&self) {
        let rule = "=".repeat(50);
        self.render(Event::SystemInfo { text: rule.clone() });
        self.render(Event::SystemInfo {
            text: format!("Rostrum - {}", self.blueprint.name),
        });
        if !self.blueprint.description.is_empty() {
            self.render(Event::SystemInfo {
                text: self.blueprint.description.clone(),
            });
        }
        let roster: Vec<&str> = self
            .blueprint
            .agents
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        self.render(Event::SystemInfo {
            text: format!("Agents: {}", roster.join(", ")),
        });
        self.render(Event::SystemInfo {
            text: "Type /quit to exit, /clear to reset".to_string(),
        });
        self.render(Event::SystemInfo { text: rule });
    }
}

/// URL-safe floor identifier derived from the blueprint name.
fn slugify(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "floor".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_produces_url_safe_names() {
        assert_eq!(slugify("My Fancy Floor"), "my-fancy-floor");
        assert_eq!(slugify("dev"), "dev");
        assert_eq!(slugify("  "), "floor");
        assert_eq!(slugify("a/b"), "a-b");
    }
}
