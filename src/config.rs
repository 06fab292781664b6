// Metanoia Configuration
//
// Defines configuration for the validity tracker, evolution engine,
// trigger engine, and task coordinator, including thresholds, windows,
// and scheduling intervals.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level configuration for the adaptive learning core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetanoiaConfig {
    /// Validity tracking and drift detection settings
    #[serde(default)]
    pub validity: ValidityConfig,

    /// Knowledge evolution settings
    #[serde(default)]
    pub evolution: EvolutionConfig,

    /// Trigger evaluation settings
    #[serde(default)]
    pub triggers: TriggerConfig,

    /// Retraining coordinator settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

/// Configuration for the validity tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidityConfig {
    /// Trailing window (days) over which validity is computed and drift
    /// halves are compared
    pub drift_window_days: i64,

    /// Minimum usage events inside the window before a validity score is
    /// recomputed. Below this the score is left unchanged.
    pub min_usage_for_validity: u64,

    /// Validity below this marks the unit stale
    pub validity_threshold: f64,
}

impl Default for ValidityConfig {
    fn default() -> Self {
        Self {
            drift_window_days: 30,
            min_usage_for_validity: 5,
            validity_threshold: 0.6,
        }
    }
}

/// Configuration for the knowledge evolution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Units below this confidence are pruned
    pub min_confidence_threshold: f64,

    /// Usage count at which the success-rate pruning rule applies
    pub min_usage_count: u64,

    /// Units used at least `min_usage_count` times with a success rate
    /// below this are pruned
    pub min_success_rate: f64,

    /// Never-used units older than this are pruned
    pub max_age_days: f64,

    /// Exponential smoothing factor for confidence updates
    pub smoothing_factor: f64,

    /// Extra multiplier applied to confidence after a failed experience
    pub failure_penalty: f64,

    /// Interval between auto-evolution cycles (in seconds)
    #[serde(with = "serde_duration")]
    pub auto_interval: Duration,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 0.3,
            min_usage_count: 5,
            min_success_rate: 0.5,
            max_age_days: 90.0,
            smoothing_factor: 0.3,
            failure_penalty: 0.9,
            auto_interval: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// Configuration for the trigger engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Fixed poll interval reported as `next_evaluation_time` (in seconds)
    #[serde(with = "serde_duration")]
    pub poll_interval: Duration,

    /// Invocation history entries retained per trigger for rate limiting
    pub max_invocation_history: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_invocation_history: 100,
        }
    }
}

/// Configuration for the task coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum tasks concurrently in flight
    pub max_concurrent: usize,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// When false, a task fails terminally on its first error
    pub retry_on_failure: bool,

    /// Backoff base; attempt `n` waits `base * n` (in seconds)
    #[serde(with = "serde_duration")]
    pub backoff_base: Duration,

    /// Enrich task config from learning-component insights before execution
    pub share_learning: bool,

    /// Sort the batch by priority before draining
    pub priority_sort: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_retries: 3,
            retry_on_failure: true,
            backoff_base: Duration::from_secs(1),
            share_learning: false,
            priority_sort: true,
        }
    }
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl MetanoiaConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: MetanoiaConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: MetanoiaConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validity.drift_window_days < 1 {
            return Err(ConfigError::ValidationError(
                "validity: drift_window_days must be at least 1".to_string(),
            ));
        }

        Self::check_unit_interval("validity.validity_threshold", self.validity.validity_threshold)?;
        Self::check_unit_interval(
            "evolution.min_confidence_threshold",
            self.evolution.min_confidence_threshold,
        )?;
        Self::check_unit_interval("evolution.min_success_rate", self.evolution.min_success_rate)?;
        Self::check_unit_interval("evolution.smoothing_factor", self.evolution.smoothing_factor)?;
        Self::check_unit_interval("evolution.failure_penalty", self.evolution.failure_penalty)?;

        if self.evolution.max_age_days <= 0.0 {
            return Err(ConfigError::ValidationError(
                "evolution: max_age_days must be positive".to_string(),
            ));
        }

        if self.triggers.poll_interval < Duration::from_secs(1) {
            return Err(ConfigError::ValidationError(
                "triggers: poll_interval must be at least 1 second".to_string(),
            ));
        }

        if self.triggers.max_invocation_history == 0 {
            return Err(ConfigError::ValidationError(
                "triggers: max_invocation_history must be at least 1".to_string(),
            ));
        }

        if self.coordinator.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(
                "coordinator: max_concurrent must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn check_unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::ValidationError(format!(
                "{}: must be between 0.0 and 1.0, got {}",
                name, value
            )));
        }
        Ok(())
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MetanoiaConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_threshold_out_of_range() {
        let mut config = MetanoiaConfig::default();
        config.validity.validity_threshold = 1.5;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("validity.validity_threshold"));
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = MetanoiaConfig::default();
        config.coordinator.max_concurrent = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("max_concurrent must be at least 1"));
    }

    #[test]
    fn test_validate_drift_window_too_short() {
        let mut config = MetanoiaConfig::default();
        config.validity.drift_window_days = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let toml_str = r#"
            [validity]
            drift_window_days = 14
            min_usage_for_validity = 3
            validity_threshold = 0.5

            [evolution]
            min_confidence_threshold = 0.2
            min_usage_count = 10
            min_success_rate = 0.4
            max_age_days = 60.0
            smoothing_factor = 0.3
            failure_penalty = 0.9
            auto_interval = 1800

            [triggers]
            poll_interval = 30
            max_invocation_history = 50

            [coordinator]
            max_concurrent = 2
            max_retries = 5
            retry_on_failure = true
            backoff_base = 1
            share_learning = true
            priority_sort = false
        "#;

        let config = MetanoiaConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.validity.drift_window_days, 14);
        assert_eq!(config.evolution.min_usage_count, 10);
        assert_eq!(config.triggers.poll_interval, Duration::from_secs(30));
        assert_eq!(config.coordinator.max_concurrent, 2);
        assert!(config.coordinator.share_learning);
        assert!(!config.coordinator.priority_sort);
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let toml_str = r#"
            [coordinator]
            max_concurrent = 8
            max_retries = 3
            retry_on_failure = false
            backoff_base = 2
            share_learning = false
            priority_sort = true
        "#;

        let config = MetanoiaConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.coordinator.max_concurrent, 8);
        // Unspecified sections fall back to defaults
        assert_eq!(config.validity.drift_window_days, 30);
        assert_eq!(config.evolution.min_usage_count, 5);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = MetanoiaConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: MetanoiaConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(
            config.validity.drift_window_days,
            deserialized.validity.drift_window_days
        );
        assert_eq!(
            config.coordinator.max_concurrent,
            deserialized.coordinator.max_concurrent
        );
    }
}
