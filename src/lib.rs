//! # Taskhive
//!
//! Hierarchical LLM worker engine - tasks go down, results come up.
//!
//! Each [`Worker`] runs its own tool-use loop against an LLM and may hand
//! sub-tasks to new workers of a lower-level [`Role`]. The whole tree is
//! advanced cooperatively by an [`Orchestrator`] tick; nothing inside a tick
//! blocks.
//!
//! ## Architecture
//!
//! ```text
//!   Op ──▶ ┌─────────────────────────────────────────────┐ ──▶ Event
//!          │                ORCHESTRATOR                 │
//!          │     tick ─▶ root.step() ─▶ child.step() …   │
//!          └──────────────────────┬──────────────────────┘
//!                                 │ Mailbox
//!                          ┌──────┴──────┐
//!                          │ orchestrator│ level 9
//!                          └──────┬──────┘
//!                     ┌───────────┴───────────┐
//!                     ▼                       ▼
//!              ┌─────────────┐         ┌─────────────┐
//!              │  team_lead  │ 6       │ researcher  │ 2
//!              └──────┬──────┘         └─────────────┘
//!                     ▼
//!              ┌─────────────┐
//!              │  developer  │ 4
//!              └─────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Worker**: one node of the tree, with its own context log and status
//! - **Role**: immutable profile (model, tools, prompt, delegation level)
//! - **Mailbox**: one overwrite slot per direction between parent and child
//! - **Session**: the registries and LLM client shared by a tree
//! - **Event**: fire-and-forget progress notification

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod hierarchy;
pub mod llm;
pub mod mailbox;
pub mod orchestrator;
pub mod protocol;
pub mod role;
pub mod session;
pub mod tools;
pub mod worker;

#[cfg(test)]
mod testing;

pub use channel::{ChannelError, ChannelPair, EventSink, HiveChannel};
pub use config::EngineConfig;
pub use context::{BlockType, ContextBlock, ContextLog};
pub use error::{ConfigError, DelegationError, HiveError, LlmError, ToolError};
pub use hierarchy::Hierarchy;
pub use llm::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmClient, PricingTable, ToolCall,
    ToolDefinition, Usage,
};
pub use mailbox::Mailbox;
pub use orchestrator::Orchestrator;
pub use protocol::{Event, Op, RoleId, TodoItem, TodoStatus, WorkerId, WorkerSnapshot, WorkerStatus};
pub use role::{Role, RoleRegistry};
pub use session::{Session, SessionHandle};
pub use tools::{Tool, ToolContext, ToolRegistry};
pub use worker::Worker;
