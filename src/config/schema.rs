//! Configuration schema for lifecache
//!
//! Configuration is stored at `~/.config/lifecache/config.toml`

use crate::entity::{EntityOptions, DEFAULT_LIFE, DEFAULT_MAX_LIFE};
use crate::store::{StoreSettings, DEFAULT_EVENT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Entity lifecycle defaults
    pub entity: EntityConfig,

    /// Store settings
    pub store: StoreConfig,
}

impl Config {
    /// Reject values the life engine cannot work with
    pub fn validate(&self) -> Result<(), String> {
        let entity = &self.entity;
        if !entity.initial_life.is_finite() || entity.initial_life <= 0.0 {
            return Err(format!(
                "entity.initial_life must be a positive number, got {}",
                entity.initial_life
            ));
        }
        if !entity.max_life.is_finite() || entity.max_life < entity.initial_life {
            return Err(format!(
                "entity.max_life must be at least entity.initial_life ({}), got {}",
                entity.initial_life, entity.max_life
            ));
        }
        if entity.life_unit_ms == 0 {
            return Err("entity.life_unit_ms must be greater than zero".to_string());
        }
        if self.store.event_capacity == 0 {
            return Err("store.event_capacity must be greater than zero".to_string());
        }
        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            return Err(format!(
                "general.log_format must be \"text\" or \"json\", got {:?}",
                self.general.log_format
            ));
        }
        Ok(())
    }

    /// Settings for a store built from this configuration
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            label: self.store.label.clone(),
            initial_life: self.entity.initial_life,
            max_life: self.entity.max_life,
            life_unit: self.entity.life_unit(),
            default_options: self.entity.options(),
            event_capacity: self.store.event_capacity,
        }
    }
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Record store events to the audit log
    pub audit_log: bool,

    /// Audit log location (default: state dir)
    pub audit_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: false,
            audit_path: None,
        }
    }
}

/// Entity lifecycle defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Life budget of a new entity, in life units
    pub initial_life: f64,

    /// Upper bound on any life budget, in life units
    pub max_life: f64,

    /// Length of one life unit in milliseconds
    pub life_unit_ms: u64,

    /// Run the readiness check on construction
    pub check: bool,

    /// Invoke the create capability on construction
    pub create: bool,

    /// Extend life on data operations
    pub keep: bool,
}

impl EntityConfig {
    pub fn life_unit(&self) -> Duration {
        Duration::from_millis(self.life_unit_ms)
    }

    pub fn options(&self) -> EntityOptions {
        EntityOptions {
            check: self.check,
            create: self.create,
            keep: self.keep,
        }
    }
}

impl Default for EntityConfig {
    fn default() -> Self {
        let options = EntityOptions::default();
        Self {
            initial_life: DEFAULT_LIFE,
            max_life: DEFAULT_MAX_LIFE,
            life_unit_ms: 1000,
            check: options.check,
            create: options.create,
            keep: options.keep,
        }
    }
}

/// Store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name used in logs and audit records
    pub label: String,

    /// Events buffered per subscriber
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            label: "lifecache".to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[entity]"));
        assert!(toml.contains("[store]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [entity]
            keep = true
            life_unit_ms = 50
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.entity.keep);
        assert_eq!(config.entity.initial_life, DEFAULT_LIFE); // default preserved

        let settings = config.store_settings();
        assert_eq!(settings.life_unit, Duration::from_millis(50));
        assert!(settings.default_options.keep);
        assert!(settings.default_options.check);
    }

    #[test]
    fn validate_rejects_bad_life() {
        let mut config = Config::default();
        config.entity.initial_life = 0.0;
        assert!(config.validate().unwrap_err().contains("initial_life"));

        let mut config = Config::default();
        config.entity.max_life = 1.0;
        assert!(config.validate().unwrap_err().contains("max_life"));

        let mut config = Config::default();
        config.entity.life_unit_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_log_format() {
        let mut config = Config::default();
        config.general.log_format = "yaml".to_string();
        assert!(config.validate().is_err());
    }
}
