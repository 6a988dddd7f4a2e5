//! # Error Types
//!
//! Structured errors for the runtime. Nothing in here is fatal to the process:
//! pools and the controller report these back to the caller and keep running.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommonThreadError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid pool configuration: {0}")]
    InvalidPool(String),

    #[error("No work queue bound to pool {pool}")]
    NoQueueBound { pool: String },

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Signal handler error: {0}")]
    Signal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommonThreadError {
    /// Create a pool validation error
    pub fn invalid_pool(message: impl Into<String>) -> Self {
        Self::InvalidPool(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an error for a queue operation on a pool without a queue
    pub fn no_queue_bound(pool: impl Into<String>) -> Self {
        Self::NoQueueBound { pool: pool.into() }
    }
}

impl From<config::ConfigError> for CommonThreadError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CommonThreadError>;
