//! Blueprint schema and loading for rostrum floors.
//!
//! A blueprint is a human-written YAML file describing one floor: its
//! agents, workstations, and furniture. Loading applies per-agent defaults
//! so the rest of the system never has to deal with unset fields. Unknown
//! keys are ignored.

use rostrum_common::{Result, RostrumError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// How an agent is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Chat-completion HTTP endpoint with function-call tools
    Native,
    /// Child process speaking the external-agent protocol over stdio
    External,
}

/// When an agent wakes without being mentioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Wakes for any message it did not author
    Always,
    /// Wakes only when explicitly mentioned with `@id?`
    Mention,
}

/// How much of other agents' tool activity this agent sees in its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolContext {
    Full,
    Summary,
    None,
}

/// One agent on the floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Participant id; must start with '@' and be unique on the floor
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// "native" (default) or "external"
    #[serde(default = "default_kind")]
    pub kind: AgentKind,

    #[serde(default = "default_activation")]
    pub activation: Activation,

    #[serde(default)]
    pub can_use_tools: bool,

    #[serde(default = "default_tool_context")]
    pub tool_context: ToolContext,

    /// System prompt
    #[serde(default)]
    pub prompt: String,

    /// Names of furniture this agent may use
    #[serde(default)]
    pub furniture: Vec<String>,

    // --- native only ---
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    // --- external only ---
    /// Command to launch the agent process
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the agent process; `${NAME}` values are
    /// expanded from the parent environment at spawn time
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_kind() -> AgentKind {
    AgentKind::Native
}

fn default_activation() -> Activation {
    Activation::Mention
}

fn default_tool_context() -> ToolContext {
    ToolContext::Full
}

fn default_temperature() -> f64 {
    0.7
}

/// A workstation attached to the floor. Only the "sandbox" type is
/// understood by the coordinator today.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workstation {
    #[serde(default)]
    pub r#type: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub dockerfile: String,

    #[serde(default)]
    pub mount: String,
}

/// Per-agent fallbacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub model: String,
}

/// A piece of furniture on the floor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FurnitureDef {
    /// Identifier (e.g. "tasks")
    pub name: String,

    /// "taskboard" or "mcp"
    #[serde(default)]
    pub r#type: String,

    /// For mcp+stdio: command to spawn (argv[0] first)
    #[serde(default)]
    pub command: Vec<String>,

    /// For mcp+http: server URL
    #[serde(default)]
    pub url: String,
}

/// A complete floor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub agents: Vec<Agent>,

    #[serde(default)]
    pub workstations: Vec<Workstation>,

    #[serde(default)]
    pub furniture: Vec<FurnitureDef>,
}

impl Blueprint {
    /// Read a blueprint from a YAML file, applying defaults and validating
    /// the parts that are fatal at load time.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&data)
    }

    /// Parse blueprint YAML from a string.
    pub fn parse(data: &str) -> Result<Self> {
        let mut bp: Blueprint = serde_yaml::from_str(data)
            .map_err(|e| RostrumError::Blueprint(format!("invalid blueprint: {e}")))?;
        bp.apply_defaults();
        bp.validate()?;
        Ok(bp)
    }

    fn apply_defaults(&mut self) {
        for agent in &mut self.agents {
            if agent.endpoint.is_empty() {
                agent.endpoint = self.defaults.endpoint.clone();
            }
            if agent.model.is_empty() {
                agent.model = self.defaults.model.clone();
            }
        }
    }

    fn validate(&self) -> Result<()> {
        for agent in &self.agents {
            if !agent.id.starts_with('@') {
                return Err(RostrumError::Blueprint(format!(
                    "agent id {:?} must start with '@'",
                    agent.id
                )));
            }
            if agent.kind == AgentKind::External && agent.command.is_empty() {
                return Err(RostrumError::Blueprint(format!(
                    "external agent {} has no command configured",
                    agent.id
                )));
            }
        }
        Ok(())
    }

    /// Look up an agent by participant id.
    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// The sandbox workstation, if any is declared.
    pub fn sandbox_workstation(&self) -> Option<&Workstation> {
        self.workstations.iter().find(|w| w.r#type == "sandbox")
    }
}

/// The starter blueprint written by `rostrum init`.
pub fn starter_template(name: &str) -> String {
    format!(
        r#"# Rostrum blueprint - {name}
# Run with: rostrum run

name: {name}
description: "Describe your floor here"

defaults:
  endpoint: http://localhost:11434/v1
  model: llama3

agents:
  - id: "@assistant"
    name: "Assistant"
    activation: always
    can_use_tools: false
    temperature: 0.7
    prompt: |
      You are a helpful assistant.
      Keep responses concise and helpful.
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
name: test-floor
defaults:
  endpoint: http://localhost:11434/v1
  model: llama3
agents:
  - id: "@data"
    activation: always
  - id: "@code"
    kind: external
    command: some-agent
    args: ["--acp"]
    env:
      API_KEY: "${HOST_KEY}"
"#;

    #[test]
    fn parse_applies_defaults() {
        let bp = Blueprint::parse(BASIC).unwrap();
        assert_eq!(bp.agents.len(), 2);

        let data = &bp.agents[0];
        assert_eq!(data.kind, AgentKind::Native);
        assert_eq!(data.endpoint, "http://localhost:11434/v1");
        assert_eq!(data.model, "llama3");
        assert_eq!(data.temperature, 0.7);
        assert_eq!(data.activation, Activation::Always);
        assert_eq!(data.tool_context, ToolContext::Full);

        let code = &bp.agents[1];
        assert_eq!(code.kind, AgentKind::External);
        assert_eq!(code.activation, Activation::Mention);
        assert_eq!(code.command, "some-agent");
        assert_eq!(code.env.get("API_KEY").map(String::as_str), Some("${HOST_KEY}"));
    }

    #[test]
    fn external_agent_without_command_is_fatal() {
        let yaml = r#"
name: bad
agents:
  - id: "@x"
    kind: external
"#;
        let err = Blueprint::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("no command"));
    }

    #[test]
    fn agent_id_must_start_with_at() {
        let yaml = r#"
name: bad
agents:
  - id: "data"
"#;
        assert!(Blueprint::parse(yaml).is_err());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let yaml = r#"
name: test
future_field: whatever
agents:
  - id: "@a"
    shiny_new_option: 3
"#;
        let bp = Blueprint::parse(yaml).unwrap();
        assert_eq!(bp.agents[0].id, "@a");
    }

    #[test]
    fn furniture_defs_parse() {
        let yaml = r#"
name: test
furniture:
  - name: tasks
    type: taskboard
  - name: docs
    type: mcp
    command: ["mcp-docs", "--stdio"]
  - name: web
    type: mcp
    url: http://localhost:9000/mcp/
"#;
        let bp = Blueprint::parse(yaml).unwrap();
        assert_eq!(bp.furniture.len(), 3);
        assert_eq!(bp.furniture[1].command, vec!["mcp-docs", "--stdio"]);
        assert_eq!(bp.furniture[2].url, "http://localhost:9000/mcp/");
    }

    #[test]
    fn sandbox_workstation_lookup() {
        let yaml = r#"
name: test
workstations:
  - type: sandbox
    image: python:3.11-slim
"#;
        let bp = Blueprint::parse(yaml).unwrap();
        let ws = bp.sandbox_workstation().unwrap();
        assert_eq!(ws.image, "python:3.11-slim");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blueprint.yaml");
        std::fs::write(&path, BASIC).unwrap();
        let bp = Blueprint::load(&path).unwrap();
        assert_eq!(bp.name, "test-floor");
    }

    #[test]
    fn starter_template_parses() {
        let bp = Blueprint::parse(&starter_template("my-floor")).unwrap();
        assert_eq!(bp.name, "my-floor");
        assert_eq!(bp.agents.len(), 1);
        assert_eq!(bp.agents[0].activation, Activation::Always);
    }
}
