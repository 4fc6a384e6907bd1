//! Configuration management for the metrics query service
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults.

use crate::batch::BatchFailurePolicy;
use crate::types::{Resolution, SECOND_RESOLUTION};
use serde::{Deserialize, Serialize};

/// Seconds subtracted from "now" when a time-series query has no explicit end,
/// so that the newest, still-filling second is not reported.
pub const QUERY_SECOND_DELAY: i64 = 2;

/// Default cap on `count` for one time-series query: a day of one-second buckets.
pub const QUERY_MAX_COUNT: usize = 86_400;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Query parsing and execution
    #[serde(default)]
    pub query: QueryConfig,

    /// Batch endpoint behaviour
    #[serde(default)]
    pub batch: BatchConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS allowed origins (empty = allow all)
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// Query configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Ingestion lag, in seconds, subtracted from "now" for a default end time
    #[serde(default = "default_second_delay")]
    pub second_delay: i64,

    /// Resolution of the time-series table queried
    ///
    /// Answers are walked in one-second buckets, so only
    /// [`SECOND_RESOLUTION`] is accepted by [`Config::validate`].
    #[serde(default = "default_resolution")]
    pub resolution: Resolution,

    /// Largest `count` a single time-series query may ask for
    #[serde(default = "default_max_count")]
    pub max_count: usize,
}

/// Batch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// What a failing item does to the rest of the batch
    #[serde(default)]
    pub failure_policy: BatchFailurePolicy,

    /// Number of items executed concurrently within one batch
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Maximum number of URIs accepted in one envelope
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Expose Prometheus metrics at `/metrics`
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_second_delay() -> i64 { QUERY_SECOND_DELAY }
fn default_resolution() -> Resolution { SECOND_RESOLUTION }
fn default_max_count() -> usize { QUERY_MAX_COUNT }
fn default_parallelism() -> usize { 4 }
fn default_max_items() -> usize { 1000 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            second_delay: default_second_delay(),
            resolution: default_resolution(),
            max_count: default_max_count(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            failure_policy: BatchFailurePolicy::default(),
            parallelism: default_parallelism(),
            max_items: default_max_items(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("METRICS_QUERY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("METRICS_QUERY_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(delay) = std::env::var("METRICS_QUERY_SECOND_DELAY") {
            if let Ok(d) = delay.parse() {
                self.query.second_delay = d;
            }
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }
        if self.query.second_delay < 0 {
            return Err("Query second delay cannot be negative".to_string());
        }
        if self.query.resolution != SECOND_RESOLUTION {
            return Err(format!(
                "Query resolution must be {} (one-second buckets), got {}",
                SECOND_RESOLUTION, self.query.resolution
            ));
        }
        if self.query.max_count == 0 {
            return Err("Query max count must be > 0".to_string());
        }
        if self.batch.parallelism == 0 {
            return Err("Batch parallelism must be > 0".to_string());
        }
        if self.batch.max_items == 0 {
            return Err("Batch max items must be > 0".to_string());
        }
        Ok(())
    }

    /// Listen address in `host:port` form
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
