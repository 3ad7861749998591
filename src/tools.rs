//! Tool abstraction and registry
//!
//! Filesystem and shell tools live outside this crate and are registered by
//! the embedding application. Three tools are handled by the worker itself
//! and never reach the registry: [`COMPLETE_TOOL`], [`DELEGATE_TOOL`] and
//! [`TODO_TOOL`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::channel::EventSink;
use crate::error::ToolError;
use crate::llm::{ToolCall, ToolDefinition};
use crate::protocol::{RoleId, TodoItem, WorkerId};
use crate::role::Role;

/// Ends the worker's task and hands its result upward
pub const COMPLETE_TOOL: &str = "task_complete";
/// Spawns a child worker for a sub-task
pub const DELEGATE_TOOL: &str = "delegate_task";
/// Replaces the worker's advisory todo list
pub const TODO_TOOL: &str = "update_todos";

/// What a tool knows about the worker invoking it
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub worker_id: WorkerId,
    pub worker_name: String,
    pub role: RoleId,
    pub events: EventSink,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the tool. The returned string becomes the tool result shown to
    /// the model; so does the rendered error.
    async fn enact(&self, args: serde_json::Value, ctx: ToolContext) -> Result<String, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Name → tool map, filled at startup and read-only afterwards
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Names reserved for worker-handled tools are refused.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        if is_intercepted(&name) {
            warn!(tool = %name, "Rejected tool registration: name is reserved");
            return false;
        }
        debug!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
        true
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions for the named tools, in the given order. Names with no
    /// registered tool are skipped.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| match self.tools.get(name) {
                Some(tool) => Some(tool.definition()),
                None => {
                    warn!(tool = %name, "Role lists a tool that is not registered");
                    None
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

pub fn is_intercepted(name: &str) -> bool {
    matches!(name, COMPLETE_TOOL | DELEGATE_TOOL | TODO_TOOL)
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompleteArgs {
    pub result: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DelegateArgs {
    pub role: String,
    pub task: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TodoArgs {
    pub todos: Vec<TodoItem>,
}

/// Parse a call's raw JSON arguments. An empty string counts as `{}`.
pub fn parse_arguments(call: &ToolCall) -> Result<serde_json::Value, ToolError> {
    let raw = call.arguments.trim();
    let raw = if raw.is_empty() { "{}" } else { raw };
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
        tool: call.name.clone(),
        reason: e.to_string(),
    })
}

pub(crate) fn parse_typed<T: serde::de::DeserializeOwned>(call: &ToolCall) -> Result<T, ToolError> {
    let value = parse_arguments(call)?;
    serde_json::from_value(value).map_err(|e| ToolError::InvalidArguments {
        tool: call.name.clone(),
        reason: e.to_string(),
    })
}

pub fn completion_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: COMPLETE_TOOL.into(),
        description: "Finish the current task and report the final result to whoever assigned it."
            .into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "Final answer or summary of the work done"
                }
            },
            "required": ["result"]
        }),
    }
}

pub fn delegation_tool_definition(addressable: &[Arc<Role>]) -> ToolDefinition {
    let role_ids: Vec<&str> = addressable.iter().map(|r| r.id.as_str()).collect();
    ToolDefinition {
        name: DELEGATE_TOOL.into(),
        description: "Hand a self-contained sub-task to a new worker with the given role. \
                      You will receive its result when it finishes."
            .into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "role": {
                    "type": "string",
                    "enum": role_ids,
                    "description": "Role of the worker to create"
                },
                "task": {
                    "type": "string",
                    "description": "Complete description of the sub-task"
                }
            },
            "required": ["role", "task"]
        }),
    }
}

pub fn todo_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: TODO_TOOL.into(),
        description: "Replace your todo list to track progress on the current task.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "description": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"]
                            }
                        },
                        "required": ["title"]
                    }
                }
            },
            "required": ["todos"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleRegistry;
    use crate::testing::EchoTool;

    #[test]
    fn test_register_and_get() {
        let registry = ToolRegistry::new().with_tool(Arc::new(EchoTool::new()));
        assert!(registry.has("echo"));
        assert!(!registry.has("nonexistent"));
        assert_eq!(registry.get("echo").unwrap().name(), "echo");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reserved_names_rejected() {
        struct Impostor;

        #[async_trait]
        impl Tool for Impostor {
            fn name(&self) -> &str {
                COMPLETE_TOOL
            }
            fn description(&self) -> &str {
                "not really"
            }
            fn parameters_schema(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            async fn enact(&self, _args: serde_json::Value, _ctx: ToolContext) -> Result<String, ToolError> {
                Ok(String::new())
            }
        }

        let mut registry = ToolRegistry::new();
        assert!(!registry.register(Arc::new(Impostor)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_definitions_skip_unknown() {
        let registry = ToolRegistry::new().with_tool(Arc::new(EchoTool::new()));
        let defs = registry.definitions_for(&["missing".into(), "echo".into()]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[test]
    fn test_parse_arguments() {
        let ok = ToolCall::new("c1", "echo", r#"{"text":"hi"}"#);
        assert_eq!(parse_arguments(&ok).unwrap()["text"], "hi");

        let empty = ToolCall::new("c2", "echo", "  ");
        assert!(parse_arguments(&empty).unwrap().is_object());

        let broken = ToolCall::new("c3", "echo", r#"{"text": "#);
        let err = parse_arguments(&broken).unwrap_err();
        assert!(err.to_string().starts_with("Invalid arguments for echo"));
    }

    #[test]
    fn test_parse_typed_missing_field() {
        let call = ToolCall::new("c1", DELEGATE_TOOL, r#"{"role":"developer"}"#);
        let err = parse_typed::<DelegateArgs>(&call).unwrap_err();
        assert!(err.to_string().contains("task"));
    }

    #[test]
    fn test_delegation_definition_enumerates_roles() {
        let registry = RoleRegistry::builtin();
        let def = delegation_tool_definition(&registry.addressable_from(6));
        let roles = &def.parameters["properties"]["role"]["enum"];
        assert_eq!(roles, &json!(["developer", "researcher"]));
    }
}
