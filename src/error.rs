//! Hive error types

use thiserror::Error;

use crate::protocol::{RoleId, WorkerId, WorkerStatus};

/// Errors surfaced by the engine's public API
///
/// Nothing in here ever crosses a parent/child boundary: worker outcomes
/// travel through mailboxes as plain strings.
#[derive(Debug, Error)]
pub enum HiveError {
    /// Role not present in the registry
    #[error("Unknown role: {0}")]
    UnknownRole(RoleId),

    /// Worker not found in the tree
    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    /// Operation not allowed in the worker's current status
    #[error("Worker {worker_id} cannot {action} while {status}")]
    InvalidState {
        worker_id: WorkerId,
        action: &'static str,
        status: WorkerStatus,
    },

    /// No worker is currently executing
    #[error("No executing worker to target")]
    NothingToTarget,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// LLM transport error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool error
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Channel error
    #[error("Channel error: {0}")]
    Channel(String),
}

/// Failures reported by an [`LlmClient`](crate::llm::LlmClient).
///
/// These arrive after the transport's own retries have been exhausted.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Tool invocation errors; rendered into the tool's result block.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool {tool} failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },

    #[error("Unknown tool: {0}")]
    NotFound(String),
}

impl ToolError {
    /// Wrap an arbitrary error raised inside a tool implementation.
    pub fn from_anyhow(tool: impl Into<String>, err: anyhow::Error) -> Self {
        Self::ExecutionFailed {
            tool: tool.into(),
            reason: format!("{err:#}"),
        }
    }
}

/// Delegation refusals, returned to the delegating worker as its tool result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DelegationError {
    #[error("Delegation failed: unknown role `{0}`")]
    UnknownRole(RoleId),

    #[error("Delegation failed: role `{target}` (level {target_level}) is not below your level {level}")]
    LevelViolation {
        target: RoleId,
        target_level: u8,
        level: u8,
    },
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    Invalid { key: String, message: String },
}
