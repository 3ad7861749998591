//! Worker implementation - one node of the delegation tree
//!
//! A worker drives a tool-use loop against the LLM. Every call to
//! [`Worker::step`] advances it by at most one unit of work and returns
//! without waiting: completions and tool executions run as detached tokio
//! tasks whose results are picked up on a later tick.
//!
//! ```text
//!            task from parent
//!   IDLE ─────────────────────▶ THINKING ◀──────────────┐
//!    ▲                            │ tool calls           │ batch done
//!    │ task_complete /            ▼                      │
//!    │ max cycles              ACTING ───────────────────┘
//!    └────────────────────────────┤ delegate_task        ▲
//!                                 ▼                      │ replies in
//!                              WAITING ──────────────────┘
//! ```
//!
//! PAUSED can be entered from THINKING or ACTING and is left only through
//! [`Worker::resume`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::context::ContextLog;
use crate::error::{HiveError, LlmError, ToolError};
use crate::llm::{CompletionRequest, CompletionResponse, ToolCall, ToolDefinition, Usage};
use crate::mailbox::Mailbox;
use crate::protocol::{preview, Event, TodoItem, WorkerId, WorkerSnapshot, WorkerStatus};
use crate::role::Role;
use crate::session::SessionHandle;
use crate::tools::{
    completion_tool_definition, delegation_tool_definition, parse_arguments, parse_typed,
    todo_tool_definition, CompleteArgs, DelegateArgs, TodoArgs, ToolContext, COMPLETE_TOOL,
    DELEGATE_TOOL, TODO_TOOL,
};

const TOOL_REMINDER: &str = "You replied without calling a tool. Continue the task with your \
                             tools, or call `task_complete` with your final result.";
const ACKNOWLEDGEMENT: &str = "Noted. I will take this into account.";
const NO_REPLY: &str = "The worker stopped without reporting a result.";

type LlmReceiver = oneshot::Receiver<Result<CompletionResponse, LlmError>>;

struct InFlightTool {
    call: ToolCall,
    rx: oneshot::Receiver<Result<String, ToolError>>,
}

/// A node of the delegation tree
pub struct Worker {
    id: WorkerId,
    name: String,
    role: Arc<Role>,
    session: SessionHandle,
    parent_id: Option<WorkerId>,
    /// Shared with the parent (or the orchestrator, for the root)
    parent_mailbox: Mailbox,
    status: WorkerStatus,
    children: Vec<Worker>,
    child_mailboxes: HashMap<WorkerId, Mailbox>,
    /// Children whose reply has not arrived yet, in spawn order
    active_children: Vec<WorkerId>,
    context: ContextLog,
    todos: Vec<TodoItem>,
    cost: f64,
    context_used: u64,
    iteration_count: u32,
    /// Tools offered for the current task, resolved when it was accepted
    tool_definitions: Vec<ToolDefinition>,
    /// Tool names sent with the latest completion request
    offered: Vec<String>,
    /// Calls of the latest completion not executed yet
    batch: VecDeque<ToolCall>,
    llm_call: Option<LlmReceiver>,
    tool_call: Option<InFlightTool>,
    last_result: Option<String>,
}

impl Worker {
    /// Root of a tree; its tasks arrive as USER messages.
    pub fn root(role: Arc<Role>, session: SessionHandle, mailbox: Mailbox) -> Self {
        Self::new(role, session, mailbox, None)
    }

    /// Delegated worker; its tasks arrive as PARENT messages.
    pub fn child(
        role: Arc<Role>,
        session: SessionHandle,
        mailbox: Mailbox,
        parent_id: WorkerId,
    ) -> Self {
        Self::new(role, session, mailbox, Some(parent_id))
    }

    fn new(
        role: Arc<Role>,
        session: SessionHandle,
        parent_mailbox: Mailbox,
        parent_id: Option<WorkerId>,
    ) -> Self {
        let id = WorkerId::new();
        let name = format!("{}-{}", role.name, id.short());

        let mut context = ContextLog::new();
        let addressable = session.roles().addressable_from(role.level);
        context.add_system_block(role.name.clone(), role.system_prompt(&addressable));

        info!(
            worker_id = %id,
            role = %role.id,
            parent = ?parent_id,
            "Creating new worker"
        );
        session.emit(Event::WorkerSpawned {
            worker_id: id,
            parent_id,
            role: role.id.clone(),
            name: name.clone(),
        });

        Self {
            id,
            name,
            role,
            session,
            parent_id,
            parent_mailbox,
            status: WorkerStatus::Idle,
            children: Vec::new(),
            child_mailboxes: HashMap::new(),
            active_children: Vec::new(),
            context,
            todos: Vec::new(),
            cost: 0.0,
            context_used: 0,
            iteration_count: 0,
            tool_definitions: Vec::new(),
            offered: Vec::new(),
            batch: VecDeque::new(),
            llm_call: None,
            tool_call: None,
            last_result: None,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &Arc<Role> {
        &self.role
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn parent_id(&self) -> Option<WorkerId> {
        self.parent_id
    }

    pub fn children(&self) -> &[Worker] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Worker] {
        &mut self.children
    }

    /// Children still expected to reply
    pub fn active_children(&self) -> &[WorkerId] {
        &self.active_children
    }

    pub fn child_mailbox(&self, child_id: &WorkerId) -> Option<&Mailbox> {
        self.child_mailboxes.get(child_id)
    }

    pub fn context(&self) -> &ContextLog {
        &self.context
    }

    pub fn todos(&self) -> &[TodoItem] {
        &self.todos
    }

    /// Accumulated cost of this worker's own completions
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Prompt tokens of the latest completion
    pub fn context_used(&self) -> u64 {
        self.context_used
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    /// Result (or failure message) of the last finished task
    pub fn last_result(&self) -> Option<&str> {
        self.last_result.as_deref()
    }

    pub fn has_llm_call_in_flight(&self) -> bool {
        self.llm_call.is_some()
    }

    pub fn has_tool_call_in_flight(&self) -> bool {
        self.tool_call.is_some()
    }

    /// Tool calls of the current batch not yet started
    pub fn queued_tool_calls(&self) -> usize {
        self.batch.len()
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        crate::hierarchy::Hierarchy::new(self).to_tree()
    }

    /// Advance this worker and its subtree by one tick.
    ///
    /// Never blocks. Must be called from within a Tokio runtime, since
    /// completions and tool calls are spawned onto it.
    pub fn step(&mut self) {
        if self.status == WorkerStatus::Paused {
            return;
        }

        for child in &mut self.children {
            child.step();
        }

        self.check_parent_mailbox();

        match self.status {
            WorkerStatus::Idle | WorkerStatus::Paused => {}
            WorkerStatus::Thinking => self.step_thinking(),
            WorkerStatus::Acting => self.step_acting(),
            WorkerStatus::Waiting => self.step_waiting(),
        }
    }

    /// Freeze this worker (and, since it stops stepping them, its subtree).
    pub fn pause(&mut self) -> Result<(), HiveError> {
        if !self.status.is_executing() {
            return Err(HiveError::InvalidState {
                worker_id: self.id,
                action: "pause",
                status: self.status,
            });
        }
        info!(worker_id = %self.id, from = %self.status, "Pausing worker");
        self.set_status(WorkerStatus::Paused);
        Ok(())
    }

    /// Leave PAUSED for the state matching whatever is outstanding.
    pub fn resume(&mut self) -> Result<(), HiveError> {
        if self.status != WorkerStatus::Paused {
            return Err(HiveError::InvalidState {
                worker_id: self.id,
                action: "resume",
                status: self.status,
            });
        }
        let next = if self.llm_call.is_some() {
            WorkerStatus::Thinking
        } else if self.tool_call.is_some() || !self.batch.is_empty() {
            WorkerStatus::Acting
        } else {
            WorkerStatus::Thinking
        };
        info!(worker_id = %self.id, to = %next, "Resuming worker");
        self.set_status(next);
        Ok(())
    }

    /// Replace this worker's CONTEXT blocks with a fresh project summary.
    pub fn refresh_context(&mut self, summary: &str) {
        let removed = self.context.remove_blocks_by_type(crate::context::BlockType::Context);
        self.context.add_context_block("project", summary);
        debug!(worker_id = %self.id, removed, "Refreshed project context");
    }

    fn set_status(&mut self, status: WorkerStatus) {
        if self.status == status {
            return;
        }
        let from = std::mem::replace(&mut self.status, status);
        debug!(worker_id = %self.id, %from, to = %status, "Status changed");
        self.session.emit(Event::StatusChanged {
            worker_id: self.id,
            from,
            to: status,
        });
    }

    fn check_parent_mailbox(&mut self) {
        let Some(message) = self.parent_mailbox.take_from_parent() else {
            return;
        };

        if self.status == WorkerStatus::Idle {
            self.accept_task(message);
            return;
        }

        // in-flight work is left alone; the next completion sees the message
        debug!(worker_id = %self.id, status = %self.status, "Folding in parent message");
        self.context.add_parent_block("parent", message);
        self.context.add_assistant_block(self.role.name.clone(), ACKNOWLEDGEMENT);
    }

    fn accept_task(&mut self, task: String) {
        info!(worker_id = %self.id, role = %self.role.id, "Accepted task");

        if self.parent_id.is_none() {
            self.context.add_user_block("user", task.clone());
        } else {
            self.context.add_parent_block("parent", task.clone());
        }
        self.iteration_count = 0;
        self.last_result = None;
        self.batch.clear();
        self.todos.clear();
        self.tool_definitions = self.resolve_tools();

        self.session.emit(Event::TaskReceived {
            worker_id: self.id,
            task,
        });
        self.set_status(WorkerStatus::Thinking);
    }

    fn resolve_tools(&self) -> Vec<ToolDefinition> {
        let mut tools = self.session.tools().definitions_for(&self.role.tools);
        tools.push(todo_tool_definition());
        let addressable = self.session.roles().addressable_from(self.role.level);
        if !addressable.is_empty() {
            tools.push(delegation_tool_definition(&addressable));
        }
        tools.push(completion_tool_definition());
        tools
    }

    /// Whether `tool` was offered in the request that produced the batch
    fn offers(&self, tool: &str) -> bool {
        self.offered.iter().any(|name| name == tool)
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            worker_id: self.id,
            worker_name: self.name.clone(),
            role: self.role.id.clone(),
            events: self.session.events().clone(),
        }
    }


    fn step_thinking(&mut self) {
        if let Some(rx) = self.llm_call.as_mut() {
            let outcome = match rx.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Closed) => Err(LlmError::RequestFailed {
                    provider: self.role.model.clone(),
                    reason: "completion task ended without a response".into(),
                }),
            };
            self.llm_call = None;
            self.handle_completion(outcome);
            return;
        }

        self.issue_completion();
    }

    fn issue_completion(&mut self) {
        let max = self.session.max_iterations();
        if self.iteration_count >= max {
            self.exceed_max_cycles(max);
            return;
        }

        let tools = if self.iteration_count >= max.saturating_sub(1) {
            vec![completion_tool_definition()]
        } else {
            self.tool_definitions.clone()
        };
        let request = CompletionRequest {
            model: self.role.model.clone(),
            messages: self.context.to_completion_messages(),
            tools,
            temperature: self.role.temperature,
            max_tokens: self.role.max_tokens,
        };

        self.offered = request.tool_names().into_iter().map(String::from).collect();
        self.iteration_count += 1;
        debug!(
            worker_id = %self.id,
            iteration = self.iteration_count,
            messages = request.messages.len(),
            "Issuing completion"
        );
        self.session.emit(Event::Thinking {
            worker_id: self.id,
            iteration: self.iteration_count,
        });

        let llm = Arc::clone(self.session.llm());
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(llm.complete(request).await);
        });
        self.llm_call = Some(rx);
    }

    fn handle_completion(&mut self, outcome: Result<CompletionResponse, LlmError>) {
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                error!(worker_id = %self.id, error = %e, "Completion failed, pausing worker");
                self.session.emit(Event::Error {
                    worker_id: self.id,
                    message: e.to_string(),
                });
                self.set_status(WorkerStatus::Paused);
                return;
            }
        };

        if let Some(usage) = response.usage {
            self.record_usage(usage);
        }

        if let Some(content) = response.content.filter(|c| !c.trim().is_empty()) {
            self.context.add_assistant_block(self.role.name.clone(), content.clone());
            self.session.emit(Event::AssistantMessage {
                worker_id: self.id,
                content,
            });
        }

        if response.tool_calls.is_empty() {
            warn!(worker_id = %self.id, "Completion carried no tool calls");
            self.context.add_user_block("system", TOOL_REMINDER);
            self.session.emit(Event::Warning {
                worker_id: self.id,
                message: "response did not call a tool".into(),
            });
            return;
        }

        debug!(worker_id = %self.id, calls = response.tool_calls.len(), "Received tool calls");
        self.batch = response.tool_calls.into();
        self.set_status(WorkerStatus::Acting);
    }

    fn record_usage(&mut self, usage: Usage) {
        let price = self.session.price(&self.role.model, usage);
        self.cost += price;
        self.context_used = usage.prompt_tokens;
        debug!(
            worker_id = %self.id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost = self.cost,
            "Recorded usage"
        );
    }

    fn exceed_max_cycles(&mut self, max: u32) {
        warn!(worker_id = %self.id, max, "Max cycles exceeded");
        self.session.emit(Event::MaxCyclesExceeded {
            worker_id: self.id,
            iterations: self.iteration_count,
        });
        let message = format!(
            "{} failed: exceeded the maximum of {max} cycles without calling {COMPLETE_TOOL}.",
            self.name
        );
        self.finish_task(message);
    }


    fn step_acting(&mut self) {
        if let Some(mut inflight) = self.tool_call.take() {
            let outcome = match inflight.rx.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => {
                    self.tool_call = Some(inflight);
                    return;
                }
                Err(TryRecvError::Closed) => Err(ToolError::ExecutionFailed {
                    tool: inflight.call.name.clone(),
                    reason: "tool task ended without a result".into(),
                }),
            };
            let output = outcome.unwrap_or_else(|e| e.to_string());
            self.record_tool_result(&inflight.call, output);
        } else if let Some(call) = self.batch.pop_front() {
            self.execute_tool_call(call);
        }

        if self.status == WorkerStatus::Acting && self.tool_call.is_none() && self.batch.is_empty() {
            self.set_status(WorkerStatus::Thinking);
        }
    }

    fn execute_tool_call(&mut self, call: ToolCall) {
        debug!(worker_id = %self.id, tool = %call.name, call_id = %call.id, "Executing tool call");
        self.session.emit(Event::ToolStarted {
            worker_id: self.id,
            tool: call.name.clone(),
            call_id: call.id.clone(),
        });

        if !self.offers(&call.name) {
            warn!(worker_id = %self.id, tool = %call.name, "Model called an unknown tool");
            let message = ToolError::NotFound(call.name.clone()).to_string();
            self.record_tool_result(&call, message);
            return;
        }

        match call.name.as_str() {
            COMPLETE_TOOL => self.enact_completion(call),
            DELEGATE_TOOL => self.enact_delegation(call),
            TODO_TOOL => self.enact_todos(call),
            _ => self.enact_external(call),
        }
    }

    fn record_tool_result(&mut self, call: &ToolCall, output: String) {
        self.session.emit(Event::ToolFinished {
            worker_id: self.id,
            tool: call.name.clone(),
            call_id: call.id.clone(),
            preview: preview(&output, 120),
        });
        self.context.add_single_tool_block(call, output);
    }

    fn enact_external(&mut self, call: ToolCall) {
        let Some(tool) = self.session.tools().get(&call.name) else {
            let message = ToolError::NotFound(call.name.clone()).to_string();
            self.record_tool_result(&call, message);
            return;
        };
        let args = match parse_arguments(&call) {
            Ok(args) => args,
            Err(e) => {
                self.record_tool_result(&call, e.to_string());
                return;
            }
        };

        let ctx = self.tool_context();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(tool.enact(args, ctx).await);
        });
        self.tool_call = Some(InFlightTool { call, rx });
    }

    fn enact_todos(&mut self, call: ToolCall) {
        match parse_typed::<TodoArgs>(&call) {
            Ok(args) => {
                self.todos = args.todos;
                self.session.emit(Event::TodosUpdated {
                    worker_id: self.id,
                    todos: self.todos.clone(),
                });
                let message = format!("Todo list updated ({} items).", self.todos.len());
                self.record_tool_result(&call, message);
            }
            Err(e) => self.record_tool_result(&call, e.to_string()),
        }
    }

    fn enact_completion(&mut self, call: ToolCall) {
        let args = match parse_typed::<CompleteArgs>(&call) {
            Ok(args) => args,
            Err(e) => {
                self.record_tool_result(&call, e.to_string());
                return;
            }
        };

        self.record_tool_result(&call, "Task marked complete.".into());
        info!(worker_id = %self.id, "Task completed");
        self.session.emit(Event::TaskCompleted {
            worker_id: self.id,
            result: args.result.clone(),
        });
        self.finish_task(args.result);
    }

    /// Report `result` upward and return to IDLE, dropping the subtree.
    fn finish_task(&mut self, result: String) {
        self.children.clear();
        self.child_mailboxes.clear();
        self.active_children.clear();
        self.batch.clear();

        self.parent_mailbox.post_from_child(result.clone());
        self.last_result = Some(result);
        self.set_status(WorkerStatus::Idle);
    }

    fn enact_delegation(&mut self, call: ToolCall) {
        let args = match parse_typed::<DelegateArgs>(&call) {
            Ok(args) => args,
            Err(e) => {
                self.record_tool_result(&call, e.to_string());
                return;
            }
        };

        let role = match self.session.roles().resolve_delegation(self.role.level, &args.role) {
            Ok(role) => role,
            Err(e) => {
                warn!(worker_id = %self.id, target = %args.role, error = %e, "Delegation refused");
                self.record_tool_result(&call, e.to_string());
                return;
            }
        };

        let mailbox = Mailbox::new();
        mailbox.set_pending_tool_call_id(Some(call.id.clone()));
        let child = Worker::child(role, self.session.clone(), mailbox.clone(), self.id);
        let child_id = child.id;
        mailbox.post_from_parent(args.task.clone());
        self.context.add_pending_tool_block(&call, Some(mailbox.id()));

        info!(
            worker_id = %self.id,
            child_id = %child_id,
            role = %args.role,
            "Delegated sub-task"
        );
        self.session.emit(Event::Delegated {
            worker_id: self.id,
            child_id,
            role: child.role.id.clone(),
            task: args.task,
        });

        self.child_mailboxes.insert(child_id, mailbox);
        self.active_children.push(child_id);
        self.children.push(child);
        self.set_status(WorkerStatus::Waiting);
    }


    fn step_waiting(&mut self) {
        let replies: Vec<(WorkerId, Option<String>, String)> = self
            .active_children
            .iter()
            .filter_map(|child_id| {
                let mailbox = self.child_mailboxes.get(child_id)?;
                let reply = mailbox.take_from_child()?;
                Some((*child_id, mailbox.pending_tool_call_id(), reply))
            })
            .collect();

        for (child_id, call_id, reply) in replies {
            self.resolve_child_reply(child_id, call_id, reply);
        }

        let all_idle = self.active_children.iter().all(|child_id| {
            self.children
                .iter()
                .find(|c| c.id == *child_id)
                .map_or(true, |c| c.status == WorkerStatus::Idle)
        });
        if !all_idle {
            return;
        }

        for child_id in std::mem::take(&mut self.active_children) {
            warn!(worker_id = %self.id, child_id = %child_id, "Child went idle without replying");
            let call_id = self
                .child_mailboxes
                .get(&child_id)
                .and_then(|m| m.pending_tool_call_id());
            self.resolve_child_reply(child_id, call_id, NO_REPLY.to_string());
        }

        let next = if self.batch.is_empty() {
            WorkerStatus::Thinking
        } else {
            WorkerStatus::Acting
        };
        self.set_status(next);
    }

    fn resolve_child_reply(&mut self, child_id: WorkerId, call_id: Option<String>, reply: String) {
        if let Some(mailbox) = self.child_mailboxes.get(&child_id) {
            mailbox.set_pending_tool_call_id(None);
        }
        self.active_children.retain(|id| *id != child_id);

        let resolved = call_id
            .as_deref()
            .is_some_and(|id| self.context.update_tool_block_result(id, reply.clone()));
        if !resolved {
            warn!(worker_id = %self.id, child_id = %child_id, "Reply had no pending tool block");
            self.context.add_user_block("child", reply.clone());
        }

        debug!(worker_id = %self.id, child_id = %child_id, "Child replied");
        self.session.emit(Event::ChildReplied {
            worker_id: self.id,
            child_id,
        });
        self.session.emit(Event::ToolFinished {
            worker_id: self.id,
            tool: DELEGATE_TOOL.into(),
            call_id: call_id.unwrap_or_default(),
            preview: preview(&reply, 120),
        });
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role.id)
            .field("status", &self.status)
            .field("children", &self.children.len())
            .field("iteration_count", &self.iteration_count)
            .finish()
    }
}
