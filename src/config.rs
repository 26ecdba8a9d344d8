//! Configuration management
//!
//! Static configuration read once at startup: feature window, batch sizing,
//! risk thresholds, response policy, circuit-breaker tuning and model
//! location. Loaded from TOML with every section optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ml::ScorerConfig;
use crate::resilience::BreakerConfig;
use crate::response::ResponsePolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub thresholds: FeatureThresholds,

    #[serde(default)]
    pub alert_levels: ScorerConfig,

    #[serde(default)]
    pub response: ResponsePolicy,

    #[serde(default)]
    pub resilience: BreakerConfig,

    #[serde(default)]
    pub model: ModelConfig,
}

/// Pipeline scheduling and sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Trailing feature window in minutes
    pub feature_window_minutes: i64,
    /// Maximum events pulled per inference cycle
    pub batch_size: usize,
    /// Seconds between inference cycles
    pub poll_interval_secs: u64,
    /// Alert channel capacity
    pub alert_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feature_window_minutes: 5,
            batch_size: 100,
            poll_interval_secs: 5,
            alert_capacity: 1000,
        }
    }
}

/// Sensitivity thresholds for explanation heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureThresholds {
    pub failed_login_threshold: u32,
    pub unique_users_threshold: u32,
    pub failure_ratio_threshold: f64,
    pub failed_sudo_threshold: u32,
    pub rapid_privesc_seconds: u32,
}

impl Default for FeatureThresholds {
    fn default() -> Self {
        Self {
            failed_login_threshold: 5,
            unique_users_threshold: 5,
            failure_ratio_threshold: 0.7,
            failed_sudo_threshold: 3,
            rapid_privesc_seconds: 60,
        }
    }
}

/// Model location and training gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the persisted model artifacts
    pub model_path: Option<PathBuf>,
    /// Minimum baseline samples required for training
    pub min_training_samples: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            min_training_samples: 100,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or fall back to defaults
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/authwarden/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("authwarden/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Feature window as a chrono duration
    pub fn feature_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pipeline.feature_window_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RiskTier;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline.feature_window_minutes, 5);
        assert_eq!(config.pipeline.batch_size, 100);
        assert_eq!(config.alert_levels.low_threshold, 0.4);
        assert_eq!(config.alert_levels.critical_threshold, 0.9);
        assert_eq!(config.response.lock_account_cooldown_secs, 300);
        assert_eq!(config.response.block_ip_cooldown_secs, 600);
        assert!(!config.response.enable_automated_actions);
        assert_eq!(config.resilience.failure_threshold, 5);
        assert_eq!(config.resilience.recovery_timeout_secs, 60);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let toml_str = r#"
            [pipeline]
            feature_window_minutes = 10
            batch_size = 50
            poll_interval_secs = 2
            alert_capacity = 100

            [response]
            lock_account_at = "CRITICAL"
            block_ip_at = "HIGH"
            terminate_session_at = "CRITICAL"
            lock_account_cooldown_secs = 600
            block_ip_cooldown_secs = 600
            terminate_session_cooldown_secs = 180
            enable_automated_actions = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pipeline.feature_window_minutes, 10);
        assert_eq!(config.response.lock_account_at, RiskTier::Critical);
        assert!(config.response.enable_automated_actions);
        // Untouched sections keep defaults
        assert_eq!(config.alert_levels.high_threshold, 0.8);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(back.pipeline.batch_size, config.pipeline.batch_size);
        assert_eq!(
            back.resilience.recovery_timeout_secs,
            config.resilience.recovery_timeout_secs
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.pipeline.batch_size = 77;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.pipeline.batch_size, 77);
    }
}
