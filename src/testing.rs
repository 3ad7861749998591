//! Test doubles shared by the unit tests

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::channel::EventSink;
use crate::config::EngineConfig;
use crate::error::{LlmError, ToolError};
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, ToolCall, Usage};
use crate::mailbox::Mailbox;
use crate::protocol::Event;
use crate::role::builtin_roles;
use crate::session::{Session, SessionHandle};
use crate::tools::{Tool, ToolContext, ToolRegistry, COMPLETE_TOOL};
use crate::worker::Worker;

/// Usage attached to every scripted tool-call response
pub const USAGE: Usage = Usage {
    prompt_tokens: 1200,
    completion_tokens: 80,
};

/// LLM client replaying a fixed script of responses.
///
/// Once the script runs out every call completes the task with `"done"`.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    yields: u32,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<CompletionResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            yields: 0,
        }
    }

    /// Yield to the scheduler `yields` times before answering.
    pub fn with_yields(mut self, yields: u32) -> Self {
        self.yields = yields;
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().push(request);
        for _ in 0..self.yields {
            tokio::task::yield_now().await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| complete_with("fallback", "done"))
    }
}

pub fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args.to_string())
}

pub fn respond(calls: Vec<ToolCall>) -> Result<CompletionResponse, LlmError> {
    Ok(CompletionResponse {
        content: None,
        tool_calls: calls,
        usage: Some(USAGE),
    })
}

pub fn complete_with(id: &str, result: &str) -> Result<CompletionResponse, LlmError> {
    respond(vec![call(id, COMPLETE_TOOL, json!({ "result": result }))])
}

pub fn transport_failure() -> Result<CompletionResponse, LlmError> {
    Err(LlmError::RequestFailed {
        provider: "scripted".into(),
        reason: "connection reset".into(),
    })
}

/// Returns its `text` argument, optionally after yielding `yields` times
pub struct EchoTool;

impl EchoTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "yields": { "type": "integer" }
            },
            "required": ["text"]
        })
    }

    async fn enact(&self, args: Value, _ctx: ToolContext) -> Result<String, ToolError> {
        let text = args["text"].as_str().ok_or_else(|| ToolError::InvalidArguments {
            tool: "echo".into(),
            reason: "missing `text`".into(),
        })?;
        for _ in 0..args["yields"].as_u64().unwrap_or(0) {
            tokio::task::yield_now().await;
        }
        Ok(text.to_string())
    }
}

/// Always fails
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "explode"
    }

    fn description(&self) -> &str {
        "Fail unconditionally"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn enact(&self, _args: Value, _ctx: ToolContext) -> Result<String, ToolError> {
        Err(ToolError::from_anyhow(
            "explode",
            anyhow::anyhow!("boom").context("detonator misfired"),
        ))
    }
}

/// Built-in roles, with the test tools in place of the filesystem ones
pub fn test_config() -> EngineConfig {
    let roles = builtin_roles()
        .into_iter()
        .map(|mut role| {
            role.tools = vec!["echo".into(), "explode".into()];
            role
        })
        .collect();
    EngineConfig {
        roles,
        ..EngineConfig::default()
    }
}

pub fn test_tools() -> ToolRegistry {
    ToolRegistry::new()
        .with_tool(Arc::new(EchoTool::new()))
        .with_tool(Arc::new(FailingTool))
}

pub fn test_session(
    llm: Arc<ScriptedLlm>,
    config: EngineConfig,
) -> (SessionHandle, mpsc::UnboundedReceiver<Event>) {
    let (events, rx) = EventSink::channel();
    let session = Session::new(config, test_tools(), llm, events).unwrap();
    (SessionHandle::new(session), rx)
}

/// A root worker of `role` and the mailbox feeding it
pub fn root_worker(session: &SessionHandle, role: &str) -> (Worker, Mailbox) {
    let mailbox = Mailbox::new();
    let role = session.role(role).unwrap();
    (Worker::root(role, session.clone(), mailbox.clone()), mailbox)
}

pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Let spawned completions and tool calls make progress.
pub async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

pub async fn tick(worker: &mut Worker) {
    worker.step();
    settle().await;
}

/// Tick until `done` holds, at most `max` times.
pub async fn tick_until(worker: &mut Worker, max: usize, done: impl Fn(&Worker) -> bool) -> bool {
    for _ in 0..max {
        if done(worker) {
            return true;
        }
        tick(worker).await;
    }
    done(worker)
}
