//! Tool definitions for the chat-completion API.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDef,
}

/// Function-call tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub parameters: serde_json::Value,
}

impl Tool {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// The built-in command-execution tool offered to agents with sandbox access.
pub fn bash_tool() -> Tool {
    Tool::function(
        "bash",
        "Run a bash command in the workspace container.",
        json!({
            "type": "object",
            "properties": {
                "cmd": {
                    "type": "string",
                    "description": "The bash command to execute"
                }
            },
            "required": ["cmd"]
        }),
    )
}

/// A tool invocation returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments. Some providers concatenate the argument
    /// objects of several calls into this one string; see the runner's
    /// split logic.
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_tool_shape() {
        let tool = bash_tool();
        assert_eq!(tool.kind, "function");
        assert_eq!(tool.function.name, "bash");

        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["parameters"]["required"][0], "cmd");
    }

    #[test]
    fn tool_call_roundtrip() {
        let raw = r#"{"id":"call_0","type":"function","function":{"name":"bash","arguments":"{\"cmd\":\"ls\"}"}}"#;
        let call: ToolCall = serde_json::from_str(raw).unwrap();
        assert_eq!(call.function.name, "bash");
        let back = serde_json::to_string(&call).unwrap();
        let again: ToolCall = serde_json::from_str(&back).unwrap();
        assert_eq!(call, again);
    }
}
