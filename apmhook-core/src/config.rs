//! Agent configuration
//!
//! ## Configuration Sources (in precedence order)
//!
//! 1. `APM_*` environment variables (only non-empty ones are applied)
//! 2. An optional YAML file handed to [`AgentConfig::from_yaml_file`]
//! 3. Built-in defaults
//!
//! ```yaml
//! app_name: orders-gateway
//! enabled: true
//! transaction_events:
//!   max_samples_stored: 2000
//! call_event_type: OutboundCall
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BackendInitError, ConfigError};

pub const ENV_APP_NAME: &str = "APM_APP_NAME";
pub const ENV_ENABLED: &str = "APM_ENABLED";
pub const ENV_TRANSACTION_EVENTS_MAX_SAMPLES: &str = "APM_TRANSACTION_EVENTS_MAX_SAMPLES_STORED";
pub const ENV_CALL_EVENT_TYPE: &str = "APM_CALL_EVENT_TYPE";

/// Top-level agent configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Application name reported to the backend
    #[serde(default)]
    pub app_name: String,

    /// When false the backend never starts transactions
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub transaction_events: TransactionEventsConfig,

    /// If set, every completed outbound call is also reported as a custom
    /// event of this type
    #[serde(default)]
    pub call_event_type: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            enabled: default_enabled(),
            transaction_events: TransactionEventsConfig::default(),
            call_event_type: None,
        }
    }
}

/// Limits on stored transaction events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEventsConfig {
    #[serde(default = "default_max_samples_stored")]
    pub max_samples_stored: usize,
}

impl Default for TransactionEventsConfig {
    fn default() -> Self {
        Self {
            max_samples_stored: default_max_samples_stored(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_samples_stored() -> usize {
    10_000
}

impl AgentConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `getenv`.
    ///
    /// Fields may already have been set by a file or by the caller, so only
    /// variables with a non-empty value are applied.
    pub fn with_overrides<F>(mut self, getenv: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| getenv(name).filter(|value| !value.is_empty());

        if let Some(app_name) = lookup(ENV_APP_NAME) {
            self.app_name = app_name;
        }
        if let Some(raw) = lookup(ENV_ENABLED) {
            self.enabled = parse_bool(ENV_ENABLED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TRANSACTION_EVENTS_MAX_SAMPLES) {
            self.transaction_events.max_samples_stored =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        name: ENV_TRANSACTION_EVENTS_MAX_SAMPLES,
                        value: raw.clone(),
                    })?;
        }
        if let Some(event_type) = lookup(ENV_CALL_EVENT_TYPE) {
            self.call_event_type = Some(event_type);
        }

        Ok(self)
    }

    /// Checks performed by a backend before it accepts this configuration.
    pub fn validate(&self) -> Result<(), BackendInitError> {
        if self.enabled && self.app_name.trim().is_empty() {
            return Err(BackendInitError::MissingAppName);
        }
        Ok(())
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert!(config.enabled);
        assert!(config.app_name.is_empty());
        assert_eq!(config.transaction_events.max_samples_stored, 10_000);
        assert!(config.call_event_type.is_none());
    }

    #[test]
    fn test_env_overrides_apply() {
        let config = AgentConfig::default()
            .with_overrides(env(&[
                (ENV_APP_NAME, "orders"),
                (ENV_ENABLED, "false"),
                (ENV_TRANSACTION_EVENTS_MAX_SAMPLES, "250"),
                (ENV_CALL_EVENT_TYPE, "OutboundCall"),
            ]))
            .unwrap();

        assert_eq!(config.app_name, "orders");
        assert!(!config.enabled);
        assert_eq!(config.transaction_events.max_samples_stored, 250);
        assert_eq!(config.call_event_type.as_deref(), Some("OutboundCall"));
    }

    #[test]
    fn test_empty_env_values_keep_previous_fields() {
        let base = AgentConfig {
            app_name: "from-file".into(),
            transaction_events: TransactionEventsConfig {
                max_samples_stored: 42,
            },
            ..Default::default()
        };

        let config = base
            .with_overrides(env(&[
                (ENV_APP_NAME, ""),
                (ENV_TRANSACTION_EVENTS_MAX_SAMPLES, ""),
            ]))
            .unwrap();

        assert_eq!(config.app_name, "from-file");
        assert_eq!(config.transaction_events.max_samples_stored, 42);
    }

    #[test]
    fn test_invalid_max_samples_is_rejected() {
        let err = AgentConfig::default()
            .with_overrides(env(&[(ENV_TRANSACTION_EVENTS_MAX_SAMPLES, "many")]))
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "invalid APM_TRANSACTION_EVENTS_MAX_SAMPLES_STORED value: many"
        );
    }

    #[test]
    fn test_invalid_enabled_is_rejected() {
        let err = AgentConfig::default()
            .with_overrides(env(&[(ENV_ENABLED, "perhaps")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: ENV_ENABLED,
                ..
            }
        ));
    }

    #[test]
    fn test_yaml_loading_fills_defaults() {
        let config = AgentConfig::from_yaml_str(
            "app_name: inventory\ntransaction_events:\n  max_samples_stored: 5\n",
        )
        .unwrap();

        assert_eq!(config.app_name, "inventory");
        assert!(config.enabled);
        assert_eq!(config.transaction_events.max_samples_stored, 5);
    }

    #[test]
    fn test_yaml_file_missing_reports_path() {
        let err = AgentConfig::from_yaml_file(Path::new("/definitely/not/here.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/definitely/not/here.yml"));
    }

    #[test]
    fn test_validate_requires_app_name_only_when_enabled() {
        let enabled = AgentConfig::default();
        assert!(matches!(
            enabled.validate(),
            Err(BackendInitError::MissingAppName)
        ));

        let disabled = AgentConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(disabled.validate().is_ok());
    }
}
