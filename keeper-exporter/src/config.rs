//! Configuration for the metrics exporter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use keeper_common::{LoggingConfig, load_config, parse_config, parse_duration};

use crate::model::MetricKind;
use crate::registry::ConsistencyLevel;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] keeper_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Database connection settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Discovery, sampling and naming settings.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// HTTP endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database REST endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the REST endpoint (default: "http://127.0.0.1:6041").
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "http://127.0.0.1:6041".to_string()
}

fn default_username() -> String {
    "root".to_string()
}

fn default_password() -> String {
    "taosdata".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: default_username(),
            password: default_password(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Kind assigned to integer columns without an explicit override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegerKind {
    #[default]
    Counter,
    Gauge,
}

impl IntegerKind {
    pub fn kind(self) -> MetricKind {
        match self {
            IntegerKind::Counter => MetricKind::Counter,
            IntegerKind::Gauge => MetricKind::Gauge,
        }
    }
}

/// What a sampling pass does with a table whose query returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyResultPolicy {
    /// Keep serving the previously cached values.
    #[default]
    Retain,
    /// Replace the cached values with nothing.
    Clear,
}

/// Discovery, sampling and naming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Metric name prefix (default: "taos").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Database holding the monitored tables (default: "log").
    #[serde(default = "default_database")]
    pub database: String,

    /// Extra tables to track besides the ones matching `table_patterns`.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Glob patterns selecting super tables by naming convention.
    #[serde(default = "default_table_patterns")]
    pub table_patterns: Vec<String>,

    /// Sampling interval, e.g. "15s" or "500ms".
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval: String,

    /// Maximum concurrent describe calls during discovery.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Default kind for integer columns.
    #[serde(default)]
    pub integer_kind: IntegerKind,

    /// Per-column kind overrides, keyed by column name.
    #[serde(default)]
    pub kind_overrides: HashMap<String, MetricKind>,

    #[serde(default)]
    pub consistency: ConsistencyLevel,

    #[serde(default)]
    pub empty_result: EmptyResultPolicy,

    /// Refresh metadata and resample before every scrape.
    #[serde(default = "default_true")]
    pub refresh_on_scrape: bool,

    /// Create the database on startup if it does not exist.
    #[serde(default = "default_true")]
    pub create_database: bool,
}

fn default_prefix() -> String {
    "taos".to_string()
}

fn default_database() -> String {
    "log".to_string()
}

fn default_table_patterns() -> Vec<String> {
    ["taosd_*", "taos_*", "adapter_*", "keeper_*"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_rotation_interval() -> String {
    "15s".to_string()
}

fn default_pool_size() -> usize {
    32
}

fn default_true() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            database: default_database(),
            tables: Vec::new(),
            table_patterns: default_table_patterns(),
            rotation_interval: default_rotation_interval(),
            pool_size: default_pool_size(),
            integer_kind: IntegerKind::default(),
            kind_overrides: HashMap::new(),
            consistency: ConsistencyLevel::default(),
            empty_result: EmptyResultPolicy::default(),
            refresh_on_scrape: true,
            create_database: true,
        }
    }
}

impl MetricsConfig {
    /// The parsed sampling interval.
    pub fn rotation_interval(&self) -> Result<Duration, ConfigError> {
        let interval = parse_duration(&self.rotation_interval).map_err(|e| {
            ConfigError::Validation(format!(
                "Invalid rotation_interval '{}': {}",
                self.rotation_interval, e
            ))
        })?;
        if interval.is_zero() {
            return Err(ConfigError::Validation(
                "rotation_interval must be > 0".to_string(),
            ));
        }
        Ok(interval)
    }
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:6043").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:6043".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// The file is validated before it is returned.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.metrics.rotation_interval()?;

        if self.metrics.pool_size == 0 {
            return Err(ConfigError::Validation(
                "pool_size must be > 0".to_string(),
            ));
        }

        if self.metrics.database.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database must not be empty".to_string(),
            ));
        }

        let prefix_ok = self
            .metrics
            .prefix
            .chars()
            .enumerate()
            .all(|(i, c)| c.is_ascii_alphabetic() || c == '_' || (i > 0 && c.is_ascii_digit()));
        if !prefix_ok {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {}",
                self.metrics.prefix
            )));
        }

        for pattern in &self.metrics.table_patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(ConfigError::Validation(format!(
                    "Invalid table pattern '{}': {}",
                    pattern, e
                )));
            }
        }

        // Validate listen address format
        if self.http.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.http.listen
            )));
        }

        // Validate path starts with /
        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        Ok(())
    }
}
