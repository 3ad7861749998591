//! Engine configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::llm::PricingTable;
use crate::protocol::RoleId;
use crate::role::{Role, RoleRegistry};

/// Top-level engine settings, loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between orchestrator ticks
    pub tick_interval_ms: u64,
    /// LLM calls allowed per task attempt
    pub max_iterations: u32,
    /// Role of the root worker
    pub root_role: RoleId,
    pub pricing: PricingTable,
    /// Custom roles; empty means the built-in hierarchy
    pub roles: Vec<Role>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            max_iterations: 50,
            root_role: RoleId::from("orchestrator"),
            pricing: PricingTable::default(),
            roles: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Build the role registry these settings describe.
    pub fn role_registry(&self) -> Result<RoleRegistry, ConfigError> {
        if self.roles.is_empty() {
            Ok(RoleRegistry::builtin())
        } else {
            RoleRegistry::new(self.roles.iter().cloned())
        }
    }

    /// Check the settings and return the registry they produce.
    pub fn validate(&self) -> Result<RoleRegistry, ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "tick_interval_ms".into(),
                message: "must be greater than zero".into(),
            });
        }
        // the final iteration is reserved for the forced wrap-up call
        if self.max_iterations < 2 {
            return Err(ConfigError::Invalid {
                key: "max_iterations".into(),
                message: format!("must be at least 2, got {}", self.max_iterations),
            });
        }
        let registry = self.role_registry()?;
        if !registry.contains(self.root_role.as_str()) {
            return Err(ConfigError::Invalid {
                key: "root_role".into(),
                message: format!("unknown role `{}`", self.root_role),
            });
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        let registry = assert_ok!(config.validate());
        assert_eq!(registry.len(), 4);
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"max_iterations": 12}"#).unwrap();
        assert_eq!(config.max_iterations, 12);
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.root_role.as_str(), "orchestrator");
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = EngineConfig {
            max_iterations: 1,
            ..Default::default()
        };
        assert_err!(config.validate());

        let config = EngineConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert_err!(config.validate());

        let config = EngineConfig {
            root_role: RoleId::from("nobody"),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("root_role"));
    }

    #[test]
    fn test_load_custom_roles_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "root_role": "lead",
                "roles": [
                    {{"id": "lead", "name": "Lead", "model": "gpt-4o", "level": 5, "prompt": "Lead."}},
                    {{"id": "coder", "name": "Coder", "model": "gpt-4o-mini", "level": 1,
                      "tools": ["write_file"], "prompt": "Code."}}
                ]
            }}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        let registry = assert_ok!(config.validate());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.addressable_from(5).len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
