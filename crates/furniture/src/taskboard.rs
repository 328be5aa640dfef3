//! In-memory task board furniture.

use crate::{unknown_tool, Args, Furniture, ToolSpec};
use async_trait::async_trait;
use rostrum_common::{Result, RostrumError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::RwLock;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

/// A single item on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,
}

#[derive(Default)]
struct BoardState {
    tasks: Vec<Task>,
    next_id: i64,
}

/// A shared task board agents can read and write.
///
/// Readers take the shared side of the lock; every mutation goes through
/// the single writer side.
pub struct TaskBoard {
    state: RwLock<BoardState>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BoardState {
                tasks: Vec::new(),
                next_id: 1,
            }),
        }
    }

    fn list_tasks(&self, args: &Args) -> Result<serde_json::Value> {
        let filter = match args.get("status").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => Some(parse_status(s)?),
            _ => None,
        };

        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let tasks: Vec<&Task> = state
            .tasks
            .iter()
            .filter(|t| filter.map_or(true, |f| t.status == f))
            .collect();

        Ok(json!({
            "tasks": tasks,
            "count": tasks.len(),
        }))
    }

    fn add_task(&self, args: &Args) -> Result<serde_json::Value> {
        let title = args
            .get("title")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RostrumError::Furniture("title is required".to_string()))?;
        let description = args
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let task = Task {
            id: state.next_id,
            title: title.to_string(),
            description: description.to_string(),
            status: TaskStatus::Todo,
            assignee: String::new(),
        };
        state.next_id += 1;
        state.tasks.push(task.clone());

        Ok(serde_json::to_value(task)?)
    }

    fn update_task(&self, args: &Args) -> Result<serde_json::Value> {
        let id = int_arg(args, "id")?;
        // Validate before taking the write lock
        let status = match args.get("status").and_then(|v| v.as_str()) {
            Some(s) => Some(parse_status(s)?),
            None => None,
        };

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| RostrumError::Furniture(format!("task {id} not found")))?;

        if let Some(status) = status {
            task.status = status;
        }
        if let Some(assignee) = args.get("assignee").and_then(|v| v.as_str()) {
            task.assignee = assignee.to_string();
        }
        if let Some(title) = args.get("title").and_then(|v| v.as_str()) {
            task.title = title.to_string();
        }
        if let Some(description) = args.get("description").and_then(|v| v.as_str()) {
            task.description = description.to_string();
        }

        Ok(serde_json::to_value(task.clone())?)
    }

    fn get_task(&self, args: &Args) -> Result<serde_json::Value> {
        let id = int_arg(args, "id")?;
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let task = state
            .tasks
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| RostrumError::Furniture(format!("task {id} not found")))?;
        Ok(serde_json::to_value(task.clone())?)
    }
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Furniture for TaskBoard {
    fn name(&self) -> &str {
        "tasks"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "list_tasks".to_string(),
                description: "List all tasks on the board, optionally filtered by status."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "status": {
                            "type": "string",
                            "description": "Filter by status (todo, in_progress, done). Omit for all tasks."
                        }
                    }
                }),
            },
            ToolSpec {
                name: "add_task".to_string(),
                description: "Add a new task to the board.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string", "description": "Task title"},
                        "description": {"type": "string", "description": "Task description (optional)"}
                    },
                    "required": ["title"]
                }),
            },
            ToolSpec {
                name: "update_task".to_string(),
                description: "Update an existing task's status, assignee, or other fields."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "integer", "description": "Task ID to update"},
                        "status": {"type": "string", "description": "New status (todo, in_progress, done)"},
                        "assignee": {"type": "string", "description": "Assign to an agent (e.g. @coder)"},
                        "title": {"type": "string", "description": "New title"},
                        "description": {"type": "string", "description": "New description"}
                    },
                    "required": ["id"]
                }),
            },
            ToolSpec {
                name: "get_task".to_string(),
                description: "Get details of a specific task by ID.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "integer", "description": "Task ID"}
                    },
                    "required": ["id"]
                }),
            },
        ]
    }

    async fn call(&self, tool: &str, args: Args) -> Result<serde_json::Value> {
        match tool {
            "list_tasks" => self.list_tasks(&args),
            "add_task" => self.add_task(&args),
            "update_task" => self.update_task(&args),
            "get_task" => self.get_task(&args),
            _ => Err(unknown_tool(self.name(), tool)),
        }
    }
}

fn parse_status(s: &str) -> Result<TaskStatus> {
    match s {
        "todo" => Ok(TaskStatus::Todo),
        "in_progress" => Ok(TaskStatus::InProgress),
        "done" => Ok(TaskStatus::Done),
        other => Err(RostrumError::Furniture(format!(
            "invalid status {other:?} (expected todo, in_progress, done)"
        ))),
    }
}

/// Extract an integer argument, accepting any JSON number with an integral value.
fn int_arg(args: &Args, key: &str) -> Result<i64> {
    let value = args
        .get(key)
        .ok_or_else(|| RostrumError::Furniture(format!("{key} is required")))?;
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        .ok_or_else(|| RostrumError::Furniture(format!("{key} must be an integer, got {value}")))
}
