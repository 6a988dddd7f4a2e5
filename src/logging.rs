//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to the console and,
//! when a log directory is configured, to a JSON file per process.
//!
//! Also defines the log collaborator interface: pools and the controller can
//! forward their diagnostics to any [`LogSink`] in addition to `tracing`.

use chrono::{DateTime, Local, Utc};
use crossbeam::channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = config
            .environment
            .clone()
            .unwrap_or_else(get_environment);
        let log_level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment));

        let console = tracing_fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(log_level.clone()));

        let mut log_path: Option<PathBuf> = None;
        let file_layer = config.directory.as_ref().and_then(|log_dir| {
            if let Err(e) = std::fs::create_dir_all(log_dir) {
                eprintln!("Failed to create log directory {}: {e}", log_dir.display());
                return None;
            }

            let pid = process::id();
            let log_filename = format!("{}.{}.{}.log", config.application, environment, pid);
            log_path = Some(log_dir.join(&log_filename));

            let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            // The writer must outlive every log call in the process.
            std::mem::forget(guard);

            Some(
                tracing_fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(log_level.clone())),
            )
        });

        let subscriber = tracing_subscriber::registry().with(console).with(file_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_file = ?log_path,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("COMMONTHREAD_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Severity of a [`LogEntry`], lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Notice,
    Error,
    Fatal,
    Unknown,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Notice => "NOTICE",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single diagnostic record handed to a [`LogSink`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub application: String,
    pub level: Severity,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl LogEntry {
    pub fn new(application: impl Into<String>, level: Severity, message: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            level,
            message: message.into(),
            timestamp: Local::now(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {} | {}",
            self.timestamp.to_rfc3339(),
            self.application,
            self.level,
            self.message
        )
    }
}

/// Destination for pool and controller diagnostics
///
/// How entries are persisted or displayed is up to the implementation.
pub trait LogSink: Send + Sync {
    fn write(&self, entry: LogEntry);

    /// Entries below this severity are not handed to [`LogSink::write`]
    fn min_level(&self) -> Severity {
        Severity::Debug
    }
}

/// Send `message` to `sink` if it passes the sink's severity filter
pub fn write_to_sink(sink: &dyn LogSink, application: &str, level: Severity, message: impl Into<String>) {
    if level >= sink.min_level() {
        sink.write(LogEntry::new(application, level, message));
    }
}

/// Sink that re-emits entries as `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, entry: LogEntry) {
        match entry.level {
            Severity::Debug => tracing::debug!(application = %entry.application, "{}", entry.message),
            Severity::Info | Severity::Notice => {
                tracing::info!(application = %entry.application, level = %entry.level, "{}", entry.message)
            }
            Severity::Warn => tracing::warn!(application = %entry.application, "{}", entry.message),
            Severity::Error | Severity::Fatal | Severity::Unknown => {
                tracing::error!(application = %entry.application, level = %entry.level, "{}", entry.message)
            }
        }
    }
}

/// Sink that pushes entries onto a channel for a separate drain to persist
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<LogEntry>,
    min_level: Severity,
}

impl ChannelSink {
    /// Create a sink and the receiving end its entries arrive on
    pub fn new(min_level: Severity) -> (Self, Receiver<LogEntry>) {
        let (sender, receiver) = crossbeam::channel::unbounded();
        (Self { sender, min_level }, receiver)
    }
}

impl LogSink for ChannelSink {
    fn write(&self, entry: LogEntry) {
        // The drain side going away only means nobody is listening anymore.
        let _ = self.sender.send(entry);
    }

    fn min_level(&self) -> Severity {
        self.min_level
    }
}

/// Log structured data for worker pool operations
pub fn log_pool_operation(
    operation: &str,
    pool: &str,
    role: &str,
    workers: Option<usize>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        pool = %pool,
        role = %role,
        workers = workers,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🏊 POOL_OPERATION"
    );
}

/// Log structured data for controller registry operations
pub fn log_controller_operation(
    operation: &str,
    application: &str,
    category: &str,
    name: Option<&str>,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        application = %application,
        category = %category,
        name = name,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "🎛️ CONTROLLER_OPERATION"
    );
}
