//! Roles and the closed role registry

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DelegationError};
use crate::protocol::RoleId;
use crate::tools::{COMPLETE_TOOL, DELEGATE_TOOL};

/// Immutable behavioral profile assigned to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token ceiling per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Context window of `model`, for utilization display
    #[serde(default = "default_context_window")]
    pub context_window: u64,
    /// Delegation level; a worker may only address roles strictly below it
    pub level: u8,
    /// Registry tools this role may call
    #[serde(default)]
    pub tools: Vec<String>,
    /// Prompt template; the delegation roster is appended at render time
    pub prompt: String,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_context_window() -> u64 {
    128_000
}

impl Role {
    /// Render the system prompt for a worker that may delegate to `addressable`.
    pub fn system_prompt(&self, addressable: &[Arc<Role>]) -> String {
        let mut prompt = self.prompt.trim_end().to_string();

        if !addressable.is_empty() {
            let _ = write!(
                prompt,
                "\n\n## Delegation\n\nYou may hand sub-tasks to these roles with `{DELEGATE_TOOL}`:\n"
            );
            for role in addressable {
                let _ = writeln!(prompt, "- `{}`: {} (level {})", role.id, role.name, role.level);
            }
        }

        let _ = write!(
            prompt,
            "\n\nWhen the task is finished, call `{COMPLETE_TOOL}` with your final result. \
             Every reply must call a tool."
        );
        prompt
    }
}

/// Closed set of roles, built once at startup and never mutated
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: HashMap<RoleId, Arc<Role>>,
}

impl RoleRegistry {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Result<Self, ConfigError> {
        let mut map = HashMap::new();
        for role in roles {
            let id = role.id.clone();
            if map.insert(id.clone(), Arc::new(role)).is_some() {
                return Err(ConfigError::Invalid {
                    key: "roles".into(),
                    message: format!("duplicate role id `{id}`"),
                });
            }
        }
        Ok(Self { roles: map })
    }

    /// The stock four-level hierarchy
    pub fn builtin() -> Self {
        Self {
            roles: builtin_roles()
                .into_iter()
                .map(|r| (r.id.clone(), Arc::new(r)))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Role>> {
        self.roles.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.roles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Roles a worker at `level` may delegate to, highest level first
    pub fn addressable_from(&self, level: u8) -> Vec<Arc<Role>> {
        let mut roles: Vec<Arc<Role>> = self
            .roles
            .values()
            .filter(|r| r.level < level)
            .cloned()
            .collect();
        roles.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.id.cmp(&b.id)));
        roles
    }

    pub fn can_address(from_level: u8, target: &Role) -> bool {
        target.level < from_level
    }

    /// Look up and authorize a delegation target.
    pub fn resolve_delegation(&self, from_level: u8, target: &str) -> Result<Arc<Role>, DelegationError> {
        let role = self
            .get(target)
            .ok_or_else(|| DelegationError::UnknownRole(RoleId::from(target)))?;
        if !Self::can_address(from_level, &role) {
            return Err(DelegationError::LevelViolation {
                target: role.id.clone(),
                target_level: role.level,
                level: from_level,
            });
        }
        Ok(role)
    }
}

/// Definitions behind [`RoleRegistry::builtin`]
pub fn builtin_roles() -> Vec<Role> {
    vec![
        Role {
            id: RoleId::from("orchestrator"),
            name: "Orchestrator".into(),
            model: "gpt-4o".into(),
            temperature: 0.2,
            max_tokens: 4096,
            context_window: 128_000,
            level: 9,
            tools: vec!["read_file".into(), "list_files".into()],
            prompt: "You coordinate a team. Break the task into parts and delegate them; \
                     do small pieces yourself."
                .into(),
        },
        Role {
            id: RoleId::from("team_lead"),
            name: "Team Lead".into(),
            model: "gpt-4o".into(),
            temperature: 0.2,
            max_tokens: 4096,
            context_window: 128_000,
            level: 6,
            tools: vec!["read_file".into(), "list_files".into(), "run_command".into()],
            prompt: "You own one area of the task. Plan it, delegate implementation, \
                     and check the results."
                .into(),
        },
        Role {
            id: RoleId::from("developer"),
            name: "Developer".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.1,
            max_tokens: 8192,
            context_window: 128_000,
            level: 4,
            tools: vec![
                "read_file".into(),
                "write_file".into(),
                "list_files".into(),
                "run_command".into(),
            ],
            prompt: "You implement changes directly using your tools.".into(),
        },
        Role {
            id: RoleId::from("researcher"),
            name: "Researcher".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.3,
            max_tokens: 4096,
            context_window: 128_000,
            level: 2,
            tools: vec!["read_file".into(), "list_files".into()],
            prompt: "You investigate and report findings. You do not modify files.".into(),
        },
    ]
}
