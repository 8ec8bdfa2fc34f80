//! Service configuration.
//!
//! Layering: defaults, then an optional JSON file, then `NEXUS_*` environment
//! variables. The binary applies CLI flags last.

use crate::error::ConfigError;
use crate::forwarder::ForwarderConfig;
use crate::severity::Thresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_SCAN_LIMIT: usize = 200;
pub const DEFAULT_CONFIDENCE_SCORE: f64 = 0.85;
pub const DEFAULT_MODEL_VERSION: &str = "v1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8003,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub thresholds: Thresholds,
    /// Recorded on predictions when the oracle does not report one.
    pub default_confidence_score: f64,
    pub default_model_version: String,
    /// Predictions consulted when computing a baseline from history.
    pub baseline_history_limit: usize,
    /// Below this many predictions the entity is bootstrapped instead.
    pub baseline_min_history: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            default_confidence_score: DEFAULT_CONFIDENCE_SCORE,
            default_model_version: DEFAULT_MODEL_VERSION.to_string(),
            baseline_history_limit: 50,
            baseline_min_history: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Window used by `POST /trigger-analysis`.
    pub trigger_limit: usize,
    /// Window used by the periodic scheduler.
    pub scheduled_limit: usize,
    /// Seconds between scheduled scans; 0 disables the scheduler.
    pub interval_secs: u64,
    pub progress_every: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            trigger_limit: DEFAULT_SCAN_LIMIT,
            scheduled_limit: DEFAULT_SCAN_LIMIT,
            interval_secs: 0,
            progress_every: 10,
        }
    }
}

/// An HTTP collaborator (ML engine, recommendation service).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

impl ServiceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Broadcast buffer; slow subscribers lag beyond this.
    pub channel_capacity: usize,
    pub relay: Option<ForwarderConfig>,
    pub journal_dir: Option<PathBuf>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            relay: None,
            journal_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub scan: ScanConfig,
    pub ml_engine: ServiceConfig,
    pub recommendation_service: ServiceConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            detection: DetectionConfig::default(),
            scan: ScanConfig::default(),
            ml_engine: ServiceConfig::new("http://localhost:8001"),
            recommendation_service: ServiceConfig {
                timeout_ms: 30_000,
                ..ServiceConfig::new("http://localhost:4000")
            },
            notifications: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NexusConfig {
    /// Defaults, overlaid with `path` (if given) and then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Applies `NEXUS_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("NEXUS_HOST") {
            self.server.host = v;
        }
        if let Some(v) = parse_env(&lookup, "NEXUS_PORT")? {
            self.server.port = v;
        }
        if let Some(v) = parse_env(&lookup, "NEXUS_THRESHOLD_INFO")? {
            self.detection.thresholds.info = v;
        }
        if let Some(v) = parse_env(&lookup, "NEXUS_THRESHOLD_WARN")? {
            self.detection.thresholds.warn = v;
        }
        if let Some(v) = parse_env(&lookup, "NEXUS_THRESHOLD_CRITICAL")? {
            self.detection.thresholds.critical = v;
        }
        if let Some(v) = parse_env(&lookup, "NEXUS_DEFAULT_CONFIDENCE")? {
            self.detection.default_confidence_score = v;
        }
        if let Some(v) = lookup("NEXUS_DEFAULT_MODEL_VERSION") {
            self.detection.default_model_version = v;
        }
        if let Some(v) = parse_env(&lookup, "NEXUS_SCAN_INTERVAL_SECS")? {
            self.scan.interval_secs = v;
        }
        if let Some(v) = parse_env(&lookup, "NEXUS_TRIGGER_LIMIT")? {
            self.scan.trigger_limit = v;
        }
        if let Some(v) = lookup("NEXUS_ML_ENGINE_URL") {
            self.ml_engine.url = v;
        }
        if let Some(v) = lookup("NEXUS_RECOMMENDATION_URL") {
            self.recommendation_service.url = v;
        }
        if let Some(v) = lookup("NEXUS_RELAY_URL") {
            let relay = self
                .notifications
                .relay
                .get_or_insert_with(ForwarderConfig::default);
            relay.relay_url = v;
        }
        if let Some(v) = lookup("NEXUS_JOURNAL_DIR") {
            self.notifications.journal_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("NEXUS_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = parse_env(&lookup, "NEXUS_LOG_JSON")? {
            self.logging.json = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detection.thresholds.validate()?;

        let confidence = self.detection.default_confidence_score;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ConfigError::Invalid(format!(
                "default_confidence_score must be within [0, 1], got {confidence}"
            )));
        }
        if self.detection.baseline_min_history == 0 {
            return Err(ConfigError::Invalid(
                "baseline_min_history must be at least 1".into(),
            ));
        }
        if self.detection.baseline_history_limit < self.detection.baseline_min_history {
            return Err(ConfigError::Invalid(format!(
                "baseline_history_limit ({}) is below baseline_min_history ({})",
                self.detection.baseline_history_limit, self.detection.baseline_min_history
            )));
        }
        if self.scan.trigger_limit == 0 || self.scan.scheduled_limit == 0 {
            return Err(ConfigError::Invalid("scan limits must be positive".into()));
        }
        if self.notifications.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notification channel_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            }),
    }
}
