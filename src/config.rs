//! # Runtime Configuration
//!
//! Layered configuration: built-in defaults, then an optional TOML file, then
//! `COMMONTHREAD__*` environment variables (nested keys separated by `__`).
//!
//! ```toml
//! application = "poller"
//!
//! [logging]
//! level = "info"
//! directory = "log"
//!
//! [pools]
//! worker_count = 4
//! producer_interval_ms = 10000
//! task_daily_at = "17:00"
//! ```

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::constants::{
    DEFAULT_APPLICATION, DEFAULT_CONSUMER_IDLE_INTERVAL, DEFAULT_PRODUCER_INTERVAL,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TASK_DAILY_AT, DEFAULT_WORKER_COUNT, ENV_PREFIX,
    ENV_SEPARATOR, MAX_WORKERS_PER_POOL,
};
use crate::error::{CommonThreadError, Result};
use crate::scheduler::parse_time_of_day;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Display name used in diagnostics and log entries
    pub application: String,
    pub logging: LoggingConfig,
    pub pools: PoolDefaults,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            application: DEFAULT_APPLICATION.to_string(),
            logging: LoggingConfig::default(),
            pools: PoolDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name used for the log file
    pub application: String,
    /// Environment name; detected from `COMMONTHREAD_ENV` when absent
    pub environment: Option<String>,
    /// `EnvFilter` directive; derived from the environment when absent
    pub level: Option<String>,
    /// Directory for the JSON log file; console only when absent
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            application: DEFAULT_APPLICATION.to_string(),
            environment: None,
            level: None,
            directory: None,
        }
    }
}

/// Defaults applied to every pool created from this configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolDefaults {
    pub worker_count: usize,
    pub shutdown_timeout_ms: u64,
    pub producer_interval_ms: u64,
    pub consumer_idle_interval_ms: u64,
    /// Local time of day, `HH:MM` or `HH:MM:SS`
    pub task_daily_at: String,
}

impl Default for PoolDefaults {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
            producer_interval_ms: DEFAULT_PRODUCER_INTERVAL.as_millis() as u64,
            consumer_idle_interval_ms: DEFAULT_CONSUMER_IDLE_INTERVAL.as_millis() as u64,
            task_daily_at: DEFAULT_TASK_DAILY_AT.to_string(),
        }
    }
}

impl PoolDefaults {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn producer_interval(&self) -> Duration {
        Duration::from_millis(self.producer_interval_ms)
    }

    pub fn consumer_idle_interval(&self) -> Duration {
        Duration::from_millis(self.consumer_idle_interval_ms)
    }

    pub fn task_daily_at(&self) -> Result<NaiveTime> {
        parse_time_of_day(&self.task_daily_at)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count > MAX_WORKERS_PER_POOL {
            return Err(CommonThreadError::configuration(format!(
                "pools.worker_count {} exceeds the maximum of {}",
                self.worker_count, MAX_WORKERS_PER_POOL
            )));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(CommonThreadError::configuration(
                "pools.shutdown_timeout_ms must be greater than zero",
            ));
        }
        if self.producer_interval_ms == 0 || self.consumer_idle_interval_ms == 0 {
            return Err(CommonThreadError::configuration(
                "pool intervals must be greater than zero",
            ));
        }
        self.task_daily_at()
            .map_err(|e| CommonThreadError::configuration(format!("pools.task_daily_at: {e}")))?;
        Ok(())
    }
}

impl RuntimeConfig {
    /// Load defaults, then the optional TOML file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Self::default())?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: RuntimeConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, no file
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    pub fn validate(&self) -> Result<()> {
        if self.application.trim().is_empty() {
            return Err(CommonThreadError::configuration("application must not be empty"));
        }
        self.pools.validate()
    }

    /// Logging settings with the application name filled in
    pub fn logging_config(&self) -> LoggingConfig {
        let mut logging = self.logging.clone();
        if logging.application == DEFAULT_APPLICATION {
            logging.application = self.application.clone();
        }
        logging
    }
}
