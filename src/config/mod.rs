//! Configuration Management
//!
//! Loads engine configuration from TOML with `OPSMEND_*` environment
//! overrides. Sections:
//! - `[recovery]` retry, backoff, breaker and strategy settings
//! - `[classifier]` confidence floor and trend analysis
//! - `[health]` probe behaviour
//! - `[middleware]` boundary responses and critical endpoints
//! - `[logging]` tracing filter and output format

use crate::classifier::{ClassifierSettings, TrendSettings};
use crate::errors::ConfigError;
use crate::middleware::MiddlewareSettings;
use crate::recovery::{RecoveryConfig, RecoveryStrategy};
use crate::supervision::HealthSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Project-local config file name
pub const LOCAL_CONFIG_FILE: &str = "opsmend.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recovery: RecoverySection,
    pub classifier: ClassifierSection,
    pub health: HealthSection,
    pub middleware: MiddlewareSettings,
    pub logging: LoggingSection,

    /// File the config was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// `[recovery]`; camelCase spellings are accepted as aliases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    #[serde(alias = "maxRetries")]
    pub max_retries: u32,
    #[serde(alias = "baseDelayMs")]
    pub base_delay_ms: u64,
    #[serde(alias = "maxDelayMs")]
    pub max_delay_ms: u64,
    #[serde(alias = "backoffMultiplier")]
    pub backoff_multiplier: f64,
    #[serde(alias = "circuitBreakerThreshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(alias = "circuitBreakerTimeoutMs")]
    pub circuit_breaker_timeout_ms: u64,
    #[serde(alias = "healthCheckIntervalMs")]
    pub health_check_interval_ms: u64,
    pub health_wait_timeout_ms: u64,
    pub rate_limit_delay_ms: u64,
    pub failover_delay_ms: u64,
    pub cleanup_pause_ms: u64,
    pub strategy_order: Vec<String>,
    #[serde(alias = "enabledStrategies")]
    pub enabled_strategies: Vec<String>,
    /// Last-good responses kept for graceful degradation
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        let defaults = RecoveryConfig::default();
        let names = |list: &[RecoveryStrategy]| list.iter().map(|s| s.as_str().to_string()).collect();
        Self {
            max_retries: defaults.max_retries,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
            circuit_breaker_threshold: defaults.circuit_breaker_threshold,
            circuit_breaker_timeout_ms: defaults.circuit_breaker_timeout.as_millis() as u64,
            health_check_interval_ms: defaults.health_check_interval.as_millis() as u64,
            health_wait_timeout_ms: defaults.health_wait_timeout.as_millis() as u64,
            rate_limit_delay_ms: defaults.rate_limit_delay.as_millis() as u64,
            failover_delay_ms: defaults.failover_delay.as_millis() as u64,
            cleanup_pause_ms: defaults.cleanup_pause.as_millis() as u64,
            strategy_order: names(&defaults.strategy_order),
            enabled_strategies: names(&defaults.enabled_strategies),
            cache_capacity: 256,
            cache_ttl_secs: 300,
        }
    }
}

/// One day
const MAX_TREND_WINDOW_SECS: u64 = 86_400;
/// One year
const MAX_RETENTION_HOURS: u64 = 8_760;

/// `[classifier]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    pub min_confidence: f64,
    pub trend_window_secs: u64,
    /// Errors per window above which a type is flagged anomalous
    pub spike_threshold: u64,
    pub retention_hours: u64,
    pub trend_interval_secs: u64,
    pub prune_interval_secs: u64,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            trend_window_secs: 300,
            spike_threshold: 10,
            retention_hours: 24,
            trend_interval_secs: 300,
            prune_interval_secs: 3600,
        }
    }
}

/// `[health]`; the probe interval lives in `[recovery]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub probe_timeout_ms: u64,
    pub unhealthy_threshold: u32,
    /// Successful probes slower than this count as degraded; 0 disables
    pub slow_threshold_ms: u64,
    pub window: usize,
    pub poll_interval_ms: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 10_000,
            unhealthy_threshold: 3,
            slow_threshold_ms: 5_000,
            window: 20,
            poll_interval_ms: 5_000,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `tracing` env-filter directive; `RUST_LOG` takes precedence
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

fn parse_strategies(names: &[String]) -> Result<Vec<RecoveryStrategy>, ConfigError> {
    names.iter().map(|n| n.parse()).collect()
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        field: key.to_string(),
        reason: format!("cannot parse '{}'", value),
    })
}

impl Config {
    /// Load from `path`, else `./opsmend.toml`, else
    /// `~/.config/opsmend/config.toml`, else defaults. Environment overrides
    /// are applied and the result validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::read(p)?,
            None => {
                let mut candidates = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
                if let Some(home) = dirs::home_dir() {
                    candidates.push(home.join(".config/opsmend/config.toml"));
                }

                match candidates.iter().find(|p| p.is_file()) {
                    Some(p) => Self::read(p)?,
                    None => {
                        debug!("No config file found, using defaults");
                        Self::default()
                    }
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `OPSMEND_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let r = &mut self.recovery;
        if let Some(v) = lookup("OPSMEND_MAX_RETRIES") {
            r.max_retries = parse_env("OPSMEND_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("OPSMEND_BASE_DELAY_MS") {
            r.base_delay_ms = parse_env("OPSMEND_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("OPSMEND_MAX_DELAY_MS") {
            r.max_delay_ms = parse_env("OPSMEND_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("OPSMEND_BACKOFF_MULTIPLIER") {
            r.backoff_multiplier = parse_env("OPSMEND_BACKOFF_MULTIPLIER", &v)?;
        }
        if let Some(v) = lookup("OPSMEND_CIRCUIT_BREAKER_THRESHOLD") {
            r.circuit_breaker_threshold = parse_env("OPSMEND_CIRCUIT_BREAKER_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("OPSMEND_CIRCUIT_BREAKER_TIMEOUT_MS") {
            r.circuit_breaker_timeout_ms = parse_env("OPSMEND_CIRCUIT_BREAKER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("OPSMEND_HEALTH_CHECK_INTERVAL_MS") {
            r.health_check_interval_ms = parse_env("OPSMEND_HEALTH_CHECK_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("OPSMEND_ENABLED_STRATEGIES") {
            r.enabled_strategies = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("OPSMEND_LOG") {
            self.logging.filter = v;
        }
        if let Some(v) = lookup("OPSMEND_LOG_JSON") {
            self.logging.json = parse_env("OPSMEND_LOG_JSON", &v)?;
        }
        Ok(())
    }

    /// Reject values no engine could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recovery_config()?.validate()?;

        if !(0.0..=1.0).contains(&self.classifier.min_confidence) {
            return Err(ConfigError::Invalid {
                field: "classifier.min_confidence".into(),
                reason: format!("{} outside [0, 1]", self.classifier.min_confidence),
            });
        }
        if !(1..=MAX_TREND_WINDOW_SECS).contains(&self.classifier.trend_window_secs) {
            return Err(ConfigError::Invalid {
                field: "classifier.trend_window_secs".into(),
                reason: format!(
                    "{} outside [1, {}]",
                    self.classifier.trend_window_secs, MAX_TREND_WINDOW_SECS
                ),
            });
        }
        if !(1..=MAX_RETENTION_HOURS).contains(&self.classifier.retention_hours) {
            return Err(ConfigError::Invalid {
                field: "classifier.retention_hours".into(),
                reason: format!(
                    "{} outside [1, {}]",
                    self.classifier.retention_hours, MAX_RETENTION_HOURS
                ),
            });
        }
        if self.health.window == 0 {
            return Err(ConfigError::Invalid {
                field: "health.window".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.health.unhealthy_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "health.unhealthy_threshold".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.recovery.health_check_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "recovery.health_check_interval_ms".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn recovery_config(&self) -> Result<RecoveryConfig, ConfigError> {
        let r = &self.recovery;
        Ok(RecoveryConfig {
            max_retries: r.max_retries,
            base_delay: Duration::from_millis(r.base_delay_ms),
            max_delay: Duration::from_millis(r.max_delay_ms),
            backoff_multiplier: r.backoff_multiplier,
            circuit_breaker_threshold: r.circuit_breaker_threshold,
            circuit_breaker_timeout: Duration::from_millis(r.circuit_breaker_timeout_ms),
            health_check_interval: Duration::from_millis(r.health_check_interval_ms),
            health_wait_timeout: Duration::from_millis(r.health_wait_timeout_ms),
            rate_limit_delay: Duration::from_millis(r.rate_limit_delay_ms),
            failover_delay: Duration::from_millis(r.failover_delay_ms),
            cleanup_pause: Duration::from_millis(r.cleanup_pause_ms),
            strategy_order: parse_strategies(&r.strategy_order)?,
            enabled_strategies: parse_strategies(&r.enabled_strategies)?,
        })
    }

    pub fn classifier_settings(&self) -> ClassifierSettings {
        let c = &self.classifier;
        ClassifierSettings {
            min_confidence: c.min_confidence,
            trend: TrendSettings {
                window: chrono::Duration::seconds(
                    c.trend_window_secs.clamp(1, MAX_TREND_WINDOW_SECS) as i64,
                ),
                spike_threshold: c.spike_threshold,
                retention: chrono::Duration::hours(c.retention_hours.clamp(1, MAX_RETENTION_HOURS) as i64),
            },
            trend_interval: Duration::from_secs(c.trend_interval_secs.max(1)),
            prune_interval: Duration::from_secs(c.prune_interval_secs.max(1)),
        }
    }

    pub fn health_settings(&self) -> HealthSettings {
        let h = &self.health;
        HealthSettings {
            interval: Duration::from_millis(self.recovery.health_check_interval_ms),
            probe_timeout: Duration::from_millis(h.probe_timeout_ms),
            unhealthy_threshold: h.unhealthy_threshold,
            slow_threshold: (h.slow_threshold_ms > 0).then(|| Duration::from_millis(h.slow_threshold_ms)),
            window: h.window,
            poll_interval: Duration::from_millis(h.poll_interval_ms),
        }
    }
}
