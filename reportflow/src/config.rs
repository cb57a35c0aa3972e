//! Runtime configuration.
//!
//! Loaded from JSON, then adjusted by `REPORTFLOW_*` environment variables:
//!
//! | variable | field |
//! |---|---|
//! | `REPORTFLOW_MAX_RETRIES` | `retry.max_retries` |
//! | `REPORTFLOW_BASE_DELAY_MS` | `retry.base_delay_ms` |
//! | `REPORTFLOW_GENERATOR_TIMEOUT_SECS` | `generator.timeout_secs` |
//! | `REPORTFLOW_FANOUT_CONCURRENCY` | `fanout` (0 or 1 means sequential) |
//! | `REPORTFLOW_FORCE` | `force` |

use crate::generator::CostModel;
use crate::pipeline::{FanoutMode, RetryPolicy};
use crate::quality::GateConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The JSON could not be decoded.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment variable holds an unusable value.
    #[error("Invalid value '{value}' for {variable}")]
    Env {
        /// The variable name.
        variable: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The configuration is inconsistent.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn default_timeout_secs() -> u64 {
    120
}

/// Content generator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Per-call timeout in seconds; 0 disables it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GeneratorConfig {
    /// Returns the per-call timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportflowConfig {
    /// Retry policy for every generation pass.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Scheduling of per-document passes.
    #[serde(default)]
    pub fanout: FanoutMode,
    /// Generator settings.
    #[serde(default)]
    pub generator: GeneratorConfig,
    /// Usage pricing.
    #[serde(default)]
    pub cost: CostModel,
    /// Quality gate settings.
    #[serde(default)]
    pub gate: GateConfig,
    /// Run stages with missing dependencies on empty inputs.
    #[serde(default)]
    pub force: bool,
}

impl FromStr for ReportflowConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T: FromStr>(variable: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        variable,
        value: value.to_string(),
    })
}

fn parse_flag(variable: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Env {
            variable,
            value: value.to_string(),
        }),
    }
}

impl ReportflowConfig {
    /// Loads and validates a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");
        std::fs::read_to_string(path)?.parse()
    }

    /// Applies `REPORTFLOW_*` environment variables.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value, then validates.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("REPORTFLOW_MAX_RETRIES") {
            self.retry.max_retries = parse_env("REPORTFLOW_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("REPORTFLOW_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_env("REPORTFLOW_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("REPORTFLOW_GENERATOR_TIMEOUT_SECS") {
            self.generator.timeout_secs = parse_env("REPORTFLOW_GENERATOR_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("REPORTFLOW_FANOUT_CONCURRENCY") {
            let limit: usize = parse_env("REPORTFLOW_FANOUT_CONCURRENCY", &value)?;
            self.fanout = if limit <= 1 {
                FanoutMode::Sequential
            } else {
                FanoutMode::Concurrent { limit }
            };
        }
        if let Some(value) = lookup("REPORTFLOW_FORCE") {
            self.force = parse_flag("REPORTFLOW_FORCE", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Rejects nonsensical values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = self.gate.problems();
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            problems.push(format!(
                "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            ));
        }
        if matches!(self.fanout, FanoutMode::Concurrent { limit: 0 }) {
            problems.push("fanout.limit must be > 0".to_string());
        }
        if self.cost.input_per_million_usd < 0.0 || self.cost.output_per_million_usd < 0.0 {
            problems.push("cost prices must not be negative".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::ConsistencyStrictness;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: ReportflowConfig = "{}".parse().unwrap();
        assert_eq!(config, ReportflowConfig::default());
        assert_eq!(config.generator.timeout(), Some(Duration::from_secs(120)));
        assert!((config.gate.pass_threshold - 70.0).abs() < f64::EPSILON);
        assert_eq!(config.fanout, FanoutMode::Concurrent { limit: 4 });
    }

    #[test]
    fn test_partial_json() {
        let config: ReportflowConfig = r#"{
            "retry": {"max_retries": 4},
            "fanout": {"mode": "sequential"},
            "generator": {"timeout_secs": 0},
            "gate": {"strictness": "critical_blocking"},
            "force": true
        }"#
        .parse()
        .unwrap();
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.fanout, FanoutMode::Sequential);
        assert_eq!(config.generator.timeout(), None);
        assert_eq!(config.gate.strictness, ConsistencyStrictness::CriticalBlocking);
        assert!(config.force);
    }

    #[test]
    fn test_env_overrides() {
        let config = ReportflowConfig::default()
            .with_overrides(lookup(&[
                ("REPORTFLOW_MAX_RETRIES", "5"),
                ("REPORTFLOW_BASE_DELAY_MS", "0"),
                ("REPORTFLOW_GENERATOR_TIMEOUT_SECS", "30"),
                ("REPORTFLOW_FANOUT_CONCURRENCY", "8"),
                ("REPORTFLOW_FORCE", "true"),
            ]))
            .unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 0);
        assert_eq!(config.generator.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.fanout, FanoutMode::Concurrent { limit: 8 });
        assert!(config.force);

        let sequential = ReportflowConfig::default()
            .with_overrides(lookup(&[("REPORTFLOW_FANOUT_CONCURRENCY", "1")]))
            .unwrap();
        assert_eq!(sequential.fanout, FanoutMode::Sequential);
    }

    #[test]
    fn test_bad_env_value() {
        let err = ReportflowConfig::default()
            .with_overrides(lookup(&[("REPORTFLOW_MAX_RETRIES", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { variable: "REPORTFLOW_MAX_RETRIES", .. }));

        let err = ReportflowConfig::default()
            .with_overrides(lookup(&[("REPORTFLOW_FORCE", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("REPORTFLOW_FORCE"));
    }

    #[test]
    fn test_validate_rejects_bad_gate() {
        let err = r#"{"gate": {"weights": {"data_integrity": 0.5, "business_rules": 0.5, "completeness": 0.5, "formatting": 0.5}}}"#
            .parse::<ReportflowConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("weights")));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cost": {{"input_per_million_usd": 1.0, "output_per_million_usd": 2.0}}}}"#).unwrap();
        let config = ReportflowConfig::from_path(file.path()).unwrap();
        assert!((config.cost.output_per_million_usd - 2.0).abs() < f64::EPSILON);

        assert!(matches!(
            ReportflowConfig::from_path("/nonexistent/reportflow.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
