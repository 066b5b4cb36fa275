//! Configuration system for Recall.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Main configuration for the memory subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Store backend settings
    pub store: StoreSettings,
    /// Session time-to-live in seconds; refreshed on every write
    pub session_ttl_secs: u64,
    /// Hard cap on stored turns per session; oldest dropped first
    pub max_history_length: usize,
    /// Token budget settings
    pub budget: BudgetSettings,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            session_ttl_secs: 60 * 60 * 24 * 7,
            max_history_length: 100,
            budget: BudgetSettings::default(),
        }
    }
}

/// Connection settings for the key/value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Store URL (redis://host:port)
    pub url: String,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Per-operation response timeout in seconds
    pub response_timeout_secs: u64,
    /// Prefix applied to every key, for namespacing shared stores
    pub key_prefix: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_secs: 5,
            response_timeout_secs: 5,
            key_prefix: String::new(),
        }
    }
}

impl StoreSettings {
    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Response timeout as a duration.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

/// Token budget settings for context preparation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    /// Maximum tokens a prepared context may occupy
    pub max_context_tokens: usize,
    /// Usage ratio at which budget pressure is logged; never enforced
    pub compression_trigger_ratio: f32,
    /// Unconditional tail length kept by the hard-cap fallback
    pub hard_cap_tail: usize,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            max_context_tokens: 4000,
            compression_trigger_ratio: 0.8,
            hard_cap_tail: 5,
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "budget.max_context_tokens")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl MemoryConfig {
    /// Load configuration from all sources.
    ///
    /// Precedence, lowest first: built-in defaults, the user config file,
    /// a project-local `recall.toml`, then `RECALL_*` environment variables
    /// (nested fields separated by `__`, e.g. `RECALL_STORE__URL`).
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(figment::providers::Serialized::defaults(
                MemoryConfig::default(),
            ))
            .merge(Toml::file(Self::config_dir().join("recall.toml")))
            .merge(Toml::file("recall.toml"))
            .merge(Env::prefixed("RECALL_").split("__"))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, Error> {
        let config = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.store.url.is_empty() {
            result.add_error("store.url", "Store URL cannot be empty");
        }

        if self.store.connect_timeout_secs == 0 {
            result.add_error(
                "store.connect_timeout_secs",
                "connect_timeout_secs must be greater than 0",
            );
        }

        if self.store.response_timeout_secs == 0 {
            result.add_error(
                "store.response_timeout_secs",
                "response_timeout_secs must be greater than 0",
            );
        }

        if self.session_ttl_secs == 0 {
            result.add_error("session_ttl_secs", "session_ttl_secs must be greater than 0");
        }

        if self.max_history_length == 0 {
            result.add_error(
                "max_history_length",
                "max_history_length must be greater than 0",
            );
        }

        if self.max_history_length > 10_000 {
            result.add_warning(
                "max_history_length",
                "max_history_length is very high (> 10000), reads will be slow",
            );
        }

        if self.budget.max_context_tokens == 0 {
            result.add_error(
                "budget.max_context_tokens",
                "max_context_tokens must be greater than 0",
            );
        }

        let ratio = self.budget.compression_trigger_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            result.add_error(
                "budget.compression_trigger_ratio",
                format!("compression_trigger_ratio must be in (0, 1], got {ratio}"),
            );
        }

        if self.budget.hard_cap_tail == 0 {
            result.add_error("budget.hard_cap_tail", "hard_cap_tail must be greater than 0");
        }

        result
    }

    /// Session TTL as a duration.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("recall"))
            .unwrap_or_else(|| PathBuf::from("~/.config/recall"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MemoryConfig::default();
        let result = config.validate();
        assert!(
            result.is_ok(),
            "Default config should be valid: {:?}",
            result.issues
        );
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = MemoryConfig::default();
        assert_eq!(config.session_ttl_secs, 604_800);
        assert_eq!(config.max_history_length, 100);
        assert_eq!(config.budget.max_context_tokens, 4000);
        assert!((config.budget.compression_trigger_ratio - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_zero_ttl_is_error() {
        let mut config = MemoryConfig::default();
        config.session_ttl_secs = 0;
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "session_ttl_secs"));
    }

    #[test]
    fn test_trigger_ratio_out_of_range_is_error() {
        let mut config = MemoryConfig::default();
        config.budget.compression_trigger_ratio = 1.5;
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result
            .errors()
            .iter()
            .any(|e| e.field == "budget.compression_trigger_ratio"));
    }

    #[test]
    fn test_huge_history_length_is_warning() {
        let mut config = MemoryConfig::default();
        config.max_history_length = 50_000;
        let result = config.validate();
        assert!(result.is_ok());
        assert!(result
            .warnings()
            .iter()
            .any(|e| e.field == "max_history_length"));
    }
}
