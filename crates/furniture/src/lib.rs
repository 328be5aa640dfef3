//! Shared interactive objects on the floor.
//!
//! Furniture are named tool collections (task boards, external MCP servers,
//! etc.) that agents interact with via tool calls. Each furniture is
//! reachable two ways: as inline function-call tools for native agents, and
//! through the tool-protocol HTTP server in `rostrum-api` for external
//! agents. Both routes share the same instance, so state is consistent.

pub mod external_mcp;
pub mod taskboard;

use async_trait::async_trait;
use rostrum_common::Result;
use std::collections::HashMap;
use std::sync::Arc;

pub use external_mcp::ExternalMcp;
pub use taskboard::TaskBoard;

/// JSON object arguments, as decoded from a tool call.
pub type Args = serde_json::Map<String, serde_json::Value>;

/// Describes a single capability offered by a piece of furniture.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub parameters: serde_json::Value,
}

/// The furniture contract.
///
/// Calls must be safe under concurrency: a native runner and an external
/// agent's tool-protocol request may hit the same furniture at once, so
/// implementations serialize their writers internally.
#[async_trait]
pub trait Furniture: Send + Sync {
    /// The furniture identifier (e.g. "tasks").
    fn name(&self) -> &str;

    /// The tools this furniture provides.
    fn tools(&self) -> Vec<ToolSpec>;

    /// Invoke a tool by name. Returns a JSON-serializable value.
    async fn call(&self, tool: &str, args: Args) -> Result<serde_json::Value>;
}

/// The floor's furniture collection, keyed by name.
pub type FurnitureRegistry = HashMap<String, Arc<dyn Furniture>>;

/// Error text for a tool name the furniture does not recognize.
pub(crate) fn unknown_tool(furniture: &str, tool: &str) -> rostrum_common::RostrumError {
    rostrum_common::RostrumError::Furniture(format!(
        "furniture {furniture:?} has no tool {tool:?}"
    ))
}
