//! Main orchestrator - drives the worker tree

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::channel::{ChannelPair, HiveChannel};
use crate::config::EngineConfig;
use crate::error::HiveError;
use crate::hierarchy::{find_mut, visit_mut, Hierarchy};
use crate::llm::LlmClient;
use crate::mailbox::Mailbox;
use crate::protocol::{Event, Op, WorkerId, WorkerSnapshot};
use crate::session::{Session, SessionHandle};
use crate::tools::ToolRegistry;
use crate::worker::Worker;

/// Owns the root worker and ticks the tree.
///
/// Can be driven by hand ([`submit`](Self::submit), [`tick`](Self::tick),
/// [`take_result`](Self::take_result)) or handed to [`run`](Self::run)
/// behind a [`HiveChannel`].
pub struct Orchestrator {
    session: SessionHandle,
    root: Worker,
    /// The orchestrator is the root's "parent" end of this mailbox
    mailbox: Mailbox,
    op_rx: Option<mpsc::UnboundedReceiver<Op>>,
}

impl Orchestrator {
    /// Create an orchestrator whose root worker has the configured root role
    pub fn new(session: SessionHandle) -> Result<Self, HiveError> {
        let role = session.role(session.config.root_role.as_str())?;
        let mailbox = Mailbox::new();
        let root = Worker::root(role, session.clone(), mailbox.clone());

        info!(
            session_id = %session.id(),
            root = %root.id(),
            role = %root.role().id,
            "Created orchestrator"
        );

        Ok(Self {
            session,
            root,
            mailbox,
            op_rx: None,
        })
    }

    /// Create an orchestrator and return a channel for communication
    pub fn with_channel(
        config: EngineConfig,
        tools: ToolRegistry,
        llm: Arc<dyn LlmClient>,
    ) -> Result<(Self, HiveChannel), HiveError> {
        let (channel, ChannelPair { op_rx, events }) = HiveChannel::new();
        let session = SessionHandle::new(Session::new(config, tools, llm, events)?);
        let mut orchestrator = Self::new(session)?;
        orchestrator.op_rx = Some(op_rx);
        Ok((orchestrator, channel))
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn root(&self) -> &Worker {
        &self.root
    }

    pub fn hierarchy(&self) -> Hierarchy<'_> {
        Hierarchy::new(&self.root)
    }

    /// Hand a task to the root worker. An unread task is replaced.
    pub fn submit(&self, task: impl Into<String>) {
        let task = task.into();
        debug!(task = %crate::protocol::preview(&task, 80), "Submitting task");
        self.mailbox.post_from_parent(task);
    }

    /// Advance the whole tree by one step.
    pub fn tick(&mut self) {
        self.root.step();
    }

    /// Consume the root's latest result, if one is waiting
    pub fn take_result(&self) -> Option<String> {
        self.mailbox.take_from_child()
    }

    /// Pause `target`, or the executing leaf when `None`.
    pub fn pause(&mut self, target: Option<WorkerId>) -> Result<WorkerId, HiveError> {
        let target = match target {
            Some(id) => id,
            None => self
                .hierarchy()
                .executing_leaf()
                .map(Worker::id)
                .ok_or(HiveError::NothingToTarget)?,
        };
        find_mut(&mut self.root, target)
            .ok_or(HiveError::WorkerNotFound(target))?
            .pause()?;
        Ok(target)
    }

    /// Resume `target`, or every paused worker when `None`.
    pub fn resume(&mut self, target: Option<WorkerId>) -> Result<Vec<WorkerId>, HiveError> {
        let targets = match target {
            Some(id) => vec![id],
            None => self
                .hierarchy()
                .paused_workers()
                .iter()
                .map(|w| w.id())
                .collect(),
        };
        if targets.is_empty() {
            return Err(HiveError::NothingToTarget);
        }
        for id in &targets {
            find_mut(&mut self.root, *id)
                .ok_or(HiveError::WorkerNotFound(*id))?
                .resume()?;
        }
        Ok(targets)
    }

    /// Replace every worker's project summary.
    pub fn refresh_context(&mut self, summary: &str) {
        let mut refreshed = 0;
        visit_mut(&mut self.root, &mut |worker: &mut Worker| {
            worker.refresh_context(summary);
            refreshed += 1;
        });
        info!(workers = refreshed, "Refreshed project context");
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        self.hierarchy().to_tree()
    }

    /// Total spend across the tree
    pub fn total_cost(&self) -> f64 {
        self.hierarchy().total_cost()
    }

    /// Run the orchestrator event loop
    ///
    /// Ticks on the configured interval and applies operations as they
    /// arrive. Returns on [`Op::Shutdown`] or when every sender is dropped.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<(), HiveError> {
        let mut op_rx = self
            .op_rx
            .take()
            .ok_or_else(|| HiveError::Channel("orchestrator has no operation channel".into()))?;

        let mut interval = tokio::time::interval(self.session.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Starting hive orchestrator");

        loop {
            tokio::select! {
                op = op_rx.recv() => {
                    let Some(op) = op else {
                        debug!("Operation channel closed");
                        break;
                    };
                    if matches!(op, Op::Shutdown) {
                        break;
                    }
                    if let Err(e) = self.handle_op(op) {
                        warn!(error = %e, "Error handling operation");
                        self.session.emit(Event::OpFailed {
                            message: e.to_string(),
                        });
                    }
                }
                _ = interval.tick() => {
                    self.tick();
                    if let Some(result) = self.take_result() {
                        info!("Root worker produced a result");
                        self.session.emit(Event::TaskResult { result });
                    }
                }
            }
        }

        info!(cost = self.total_cost(), "Hive orchestrator stopped");
        Ok(())
    }

    /// Handle a single operation
    fn handle_op(&mut self, op: Op) -> Result<(), HiveError> {
        match op {
            Op::Submit { task } => self.submit(task),
            Op::Pause { worker_id } => {
                self.pause(worker_id)?;
            }
            Op::Resume { worker_id } => {
                self.resume(worker_id)?;
            }
            Op::RefreshContext { summary } => self.refresh_context(&summary),
            Op::Snapshot => {
                let tree = self.snapshot();
                self.session.emit(Event::Snapshot { tree });
            }
            // handled by `run`
            Op::Shutdown => {}
        }
        Ok(())
    }
}
