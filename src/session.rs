//! Session: the runtime registry shared by every worker in a tree
//!
//! Roles, tools, the LLM client, pricing and the event sink are resolved
//! once here and passed down explicitly. Nothing is process-global.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::channel::EventSink;
use crate::config::EngineConfig;
use crate::error::HiveError;
use crate::llm::{LlmClient, Usage};
use crate::protocol::{Event, RoleId};
use crate::role::{Role, RoleRegistry};
use crate::tools::ToolRegistry;

/// A hive session
pub struct Session {
    /// Session ID
    pub id: Uuid,
    /// Engine configuration
    pub config: EngineConfig,
    roles: RoleRegistry,
    tools: ToolRegistry,
    llm: Arc<dyn LlmClient>,
    events: EventSink,
}

impl Session {
    /// Create a new session, validating the configuration
    pub fn new(
        config: EngineConfig,
        tools: ToolRegistry,
        llm: Arc<dyn LlmClient>,
        events: EventSink,
    ) -> Result<Self, HiveError> {
        let roles = config.validate()?;
        let id = Uuid::new_v4();

        info!(
            session_id = %id,
            roles = roles.len(),
            tools = tools.len(),
            "Creating new session"
        );

        Ok(Self {
            id,
            config,
            roles,
            tools,
            llm,
            events,
        })
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn role(&self, id: &str) -> Result<Arc<Role>, HiveError> {
        self.roles
            .get(id)
            .ok_or_else(|| HiveError::UnknownRole(RoleId::from(id)))
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn emit(&self, event: Event) {
        self.events.emit(event);
    }

    pub fn max_iterations(&self) -> u32 {
        self.config.max_iterations
    }

    /// Monetary cost of one completion
    pub fn price(&self, model: &str, usage: Usage) -> f64 {
        self.config.pricing.price(model, usage)
    }
}

/// Cheaply clonable handle to a session
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Session>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(session),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }
}

impl std::ops::Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
