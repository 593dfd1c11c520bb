mod engine;
mod observability;
mod placeholders;
mod sessions;
mod tools;
mod web;

pub use engine::*;
pub use observability::*;
pub use placeholders::*;
pub use sessions::*;
pub use tools::*;
pub use web::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound for every duration setting (100 years).  Larger values
/// overflow timestamp arithmetic.
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 3600;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub placeholders: PlaceholdersConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ConfigError {
    fn error(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.sessions.max_age_secs == 0 {
            errors.push(ConfigError::error(
                "sessions.max_age_secs",
                "max age must be greater than 0",
            ));
        }
        if self.sessions.cleanup_interval_secs == 0 {
            errors.push(ConfigError::error(
                "sessions.cleanup_interval_secs",
                "cleanup interval must be greater than 0",
            ));
        }
        if self.sessions.state_path.is_none() {
            errors.push(ConfigError::warning(
                "sessions.state_path",
                "no state path configured; sessions are kept in memory only",
            ));
        }

        let durations = [
            ("sessions.max_age_secs", self.sessions.max_age_secs),
            ("sessions.ttl_secs", self.sessions.ttl_secs),
            ("sessions.cleanup_interval_secs", self.sessions.cleanup_interval_secs),
            ("sessions.flush_interval_secs", self.sessions.flush_interval_secs),
            ("tools.dynamic_ttl_secs", self.tools.dynamic_ttl_secs),
            ("tools.sweep_interval_secs", self.tools.sweep_interval_secs),
            (
                "engine.progress_clear_delay_ms",
                self.engine.progress_clear_delay_ms / 1000,
            ),
        ];
        for (field, secs) in durations {
            if secs > MAX_DURATION_SECS {
                errors.push(ConfigError::error(
                    field,
                    "duration exceeds the 100 year maximum",
                ));
            }
        }

        if self.tools.dynamic_ttl_secs == 0 {
            errors.push(ConfigError::error(
                "tools.dynamic_ttl_secs",
                "dynamic tool TTL must be greater than 0",
            ));
        }
        if self.tools.sweep_interval_secs == 0 {
            errors.push(ConfigError::error(
                "tools.sweep_interval_secs",
                "sweep interval must be greater than 0",
            ));
        }

        if self.engine.max_steps == 0 {
            errors.push(ConfigError::error(
                "engine.max_steps",
                "at least one model step is required",
            ));
        }
        if let Some(t) = self.engine.temperature {
            if !(0.0..=2.0).contains(&t) {
                errors.push(ConfigError::error(
                    "engine.temperature",
                    "temperature must be within 0.0-2.0",
                ));
            }
        }
        if let Some(model) = &self.engine.default_model {
            if !model.contains('/') {
                errors.push(ConfigError::warning(
                    "engine.default_model",
                    "no \"/model\" suffix; treated as a provider id using that provider's default model",
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.placeholders.knowledge_threshold) {
            errors.push(ConfigError::error(
                "placeholders.knowledge_threshold",
                "threshold must be within 0.0-1.0",
            ));
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "sample rate must be within 0.0-1.0",
            ));
        }

        errors
    }
}
