//! World configuration, loadable from JSON.
//!
//! ```
//! use bastion_engine::config::WorldConfig;
//!
//! let config = WorldConfig::from_json_str(r#"{
//!     "fixed_dt": 0.05,
//!     "manager": { "max_entities": 5000, "type_limits": { "Projectile": 800 } }
//! }"#).unwrap();
//! assert_eq!(config.manager.pool_capacity, 256);
//! assert!(config.auto_clean_references);
//! ```

use serde::{Deserialize, Serialize};

use bastion_ecs::manager::ManagerConfig;
use bastion_ecs::EcsError;

/// Errors from building or checking a [`WorldConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("fixed_dt must be positive and finite, got {0}")]
    InvalidFixedDt(f64),

    #[error(transparent)]
    Manager(#[from] EcsError),

    #[error("invalid world configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything needed to construct a [`World`](crate::world::World).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub manager: ManagerConfig,
    /// Rewrite inbound references to the sentinel when an entity is
    /// destroyed.
    pub auto_clean_references: bool,
    /// Run component `on_update` hooks at the start of every `tick`.
    pub run_component_updates: bool,
    /// Seconds per fixed tick.
    pub fixed_dt: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            auto_clean_references: true,
            run_component_updates: true,
            fixed_dt: 1.0 / 60.0,
        }
    }
}

impl WorldConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            return Err(ConfigError::InvalidFixedDt(self.fixed_dt));
        }
        self.manager.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_ecs::entity::EntityType;

    #[test]
    fn defaults() {
        let config = WorldConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.run_component_updates);
        assert_eq!(config.manager.max_entities, 100_000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = WorldConfig::from_json_str(
            r#"{"auto_clean_references": false, "manager": {"id_seed": 9, "type_limits": {"Unit": 3}}}"#,
        )
        .unwrap();
        assert!(!config.auto_clean_references);
        assert_eq!(config.manager.id_seed, Some(9));
        assert_eq!(config.manager.type_limits.get(&EntityType::Unit), Some(&3));
        assert_eq!(config.fixed_dt, 1.0 / 60.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            WorldConfig::from_json_str(r#"{"fixed_dt": 0.0}"#),
            Err(ConfigError::InvalidFixedDt(_))
        ));
        assert!(matches!(
            WorldConfig::from_json_str(r#"{"manager": {"max_entities": 0}}"#),
            Err(ConfigError::Manager(_))
        ));
        assert!(matches!(
            WorldConfig::from_json_str("not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
