//! Shared vocabulary: identifiers, worker status, operations, events and
//! tree snapshots.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a worker, assigned at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// First eight hex digits, used in display names
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a role in the [`RoleRegistry`](crate::role::RoleRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(String);

impl RoleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for RoleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Worker state machine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Waiting for a task from its parent
    #[default]
    Idle,
    /// Waiting on (or about to issue) a chat completion
    Thinking,
    /// Executing the tool calls of the latest completion, one per tick
    Acting,
    /// Delegated work to children and waiting for their replies
    Waiting,
    /// Frozen by an external request or a transport failure
    Paused,
}

impl WorkerStatus {
    /// THINKING or ACTING: the worker itself is doing the work
    pub fn is_executing(&self) -> bool {
        matches!(self, Self::Thinking | Self::Acting)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Acting => "acting",
            Self::Waiting => "waiting",
            Self::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Status of a self-reported todo item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// Advisory subtask item reported by a worker through `update_todos`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TodoStatus,
}

/// Operations accepted by a running [`Orchestrator`](crate::Orchestrator)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
    /// Hand a task (or a follow-up message) to the root worker
    Submit { task: String },
    /// Pause a worker; `None` targets the currently executing leaf
    Pause { worker_id: Option<WorkerId> },
    /// Resume a worker; `None` resumes every paused worker
    Resume { worker_id: Option<WorkerId> },
    /// Replace the project context of every worker
    RefreshContext { summary: String },
    /// Request a tree snapshot event
    Snapshot,
    /// Stop the run loop
    Shutdown,
}

/// Human-readable progress notifications
///
/// Fire-and-forget: nobody acknowledges them and nothing waits on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    WorkerSpawned {
        worker_id: WorkerId,
        parent_id: Option<WorkerId>,
        role: RoleId,
        name: String,
    },
    StatusChanged {
        worker_id: WorkerId,
        from: WorkerStatus,
        to: WorkerStatus,
    },
    TaskReceived {
        worker_id: WorkerId,
        task: String,
    },
    Thinking {
        worker_id: WorkerId,
        iteration: u32,
    },
    AssistantMessage {
        worker_id: WorkerId,
        content: String,
    },
    ToolStarted {
        worker_id: WorkerId,
        tool: String,
        call_id: String,
    },
    ToolFinished {
        worker_id: WorkerId,
        tool: String,
        call_id: String,
        preview: String,
    },
    Delegated {
        worker_id: WorkerId,
        child_id: WorkerId,
        role: RoleId,
        task: String,
    },
    ChildReplied {
        worker_id: WorkerId,
        child_id: WorkerId,
    },
    TodosUpdated {
        worker_id: WorkerId,
        todos: Vec<TodoItem>,
    },
    TaskCompleted {
        worker_id: WorkerId,
        result: String,
    },
    MaxCyclesExceeded {
        worker_id: WorkerId,
        iterations: u32,
    },
    Warning {
        worker_id: WorkerId,
        message: String,
    },
    Error {
        worker_id: WorkerId,
        message: String,
    },
    /// The root worker reported a result to the orchestrator
    TaskResult { result: String },
    /// Reply to [`Op::Snapshot`]
    Snapshot { tree: WorkerSnapshot },
    /// An operation could not be applied
    OpFailed { message: String },
}

impl Event {
    /// Worker the event is about, if any
    pub fn worker_id(&self) -> Option<WorkerId> {
        match self {
            Self::WorkerSpawned { worker_id, .. }
            | Self::StatusChanged { worker_id, .. }
            | Self::TaskReceived { worker_id, .. }
            | Self::Thinking { worker_id, .. }
            | Self::AssistantMessage { worker_id, .. }
            | Self::ToolStarted { worker_id, .. }
            | Self::ToolFinished { worker_id, .. }
            | Self::Delegated { worker_id, .. }
            | Self::ChildReplied { worker_id, .. }
            | Self::TodosUpdated { worker_id, .. }
            | Self::TaskCompleted { worker_id, .. }
            | Self::MaxCyclesExceeded { worker_id, .. }
            | Self::Warning { worker_id, .. }
            | Self::Error { worker_id, .. } => Some(*worker_id),
            Self::TaskResult { .. } | Self::Snapshot { .. } | Self::OpFailed { .. } => None,
        }
    }

    /// One-line description for a progress log
    pub fn describe(&self) -> String {
        match self {
            Self::WorkerSpawned { name, role, .. } => format!("{name} spawned as {role}"),
            Self::StatusChanged { from, to, .. } => format!("{from} -> {to}"),
            Self::TaskReceived { task, .. } => format!("received task: {}", preview(task, 80)),
            Self::Thinking { iteration, .. } => format!("thinking (iteration {iteration})"),
            Self::AssistantMessage { content, .. } => preview(content, 120),
            Self::ToolStarted { tool, .. } => format!("calling {tool}"),
            Self::ToolFinished { tool, preview, .. } => format!("{tool}: {preview}"),
            Self::Delegated { role, task, .. } => {
                format!("delegated to {role}: {}", preview(task, 80))
            }
            Self::ChildReplied { child_id, .. } => format!("reply from {}", child_id.short()),
            Self::TodosUpdated { todos, .. } => format!("{} todo item(s)", todos.len()),
            Self::TaskCompleted { result, .. } => format!("completed: {}", preview(result, 120)),
            Self::MaxCyclesExceeded { iterations, .. } => {
                format!("max cycles exceeded after {iterations} iterations")
            }
            Self::Warning { message, .. } => format!("warning: {message}"),
            Self::Error { message, .. } => format!("error: {message}"),
            Self::TaskResult { result } => format!("result: {}", preview(result, 120)),
            Self::Snapshot { tree } => format!("snapshot of {}", tree.name),
            Self::OpFailed { message } => format!("operation failed: {message}"),
        }
    }
}

/// Read-only view of a worker and its subtree, for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub name: String,
    pub role: RoleId,
    pub status: WorkerStatus,
    pub cost: f64,
    pub context_used: u64,
    pub max_context: u64,
    pub iteration_count: u32,
    pub todo_count: usize,
    pub children: Vec<WorkerSnapshot>,
}

impl WorkerSnapshot {
    /// Fraction of the context window used by the latest prompt
    pub fn context_utilization(&self) -> f64 {
        if self.max_context == 0 {
            return 0.0;
        }
        self.context_used as f64 / self.max_context as f64
    }

    /// Nodes in this subtree, including self
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(WorkerSnapshot::len).sum::<usize>()
    }
}

/// Collapse text into a single-line preview of at most `max_chars` characters.
pub fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_chars {
        let byte_offset = collapsed
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(collapsed.len());
        format!("{}...", &collapsed[..byte_offset])
    } else {
        collapsed
    }
}
