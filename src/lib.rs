#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # CommonThread
//!
//! Thread-based runtime for producer/consumer style services.
//!
//! ## Overview
//!
//! A service is composed of independently configured **worker pools**. Every
//! worker in a pool is an OS thread that runs the same unit of work over and
//! over, pacing itself against wall-clock boundaries or blocking on a shared
//! **work queue**. A **controller** tracks pools and queues by name, reports
//! their status and throughput, and stops them as a group.
//!
//! ## Module Organization
//!
//! - [`counter`] - Thread-safe job counter
//! - [`queue`] - FIFO work queue, unbounded or bounded, with cancellable waits
//! - [`scheduler`] - `every` / `at` pacing and time-of-day helpers
//! - [`pool`] - Worker pool engine with producer, consumer and task roles
//! - [`controller`] - Registry, aggregation and signal handling
//! - [`config`] - Layered runtime configuration
//! - [`logging`] - Structured logging and the log sink interface
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use commonthread::config::RuntimeConfig;
//! use commonthread::controller::Controller;
//! use commonthread::logging::init_structured_logging;
//! use commonthread::pool::Role;
//!
//! # fn main() -> commonthread::Result<()> {
//! let config = RuntimeConfig::from_env()?;
//! init_structured_logging(&config.logging_config());
//!
//! let controller = Controller::from_config(&config, None)?;
//! controller.create_queue("timestamps", None);
//! controller.create_pool(Role::Producer, "clock", controller.pool_config("clock")?.with_workers(1))?;
//! controller.create_pool(Role::Consumer, "printer", controller.pool_config("printer")?.with_workers(2))?;
//! controller.install_signal_handlers()?;
//!
//! while controller.live_workers() > 0 {
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod counter;
pub mod error;
pub mod logging;
pub mod pool;
pub mod queue;
pub mod scheduler;

pub use config::{LoggingConfig, PoolDefaults, RuntimeConfig};
pub use controller::{Controller, ControllerStats, ControllerStatus, SignalAction, SignalEscalation};
pub use counter::Counter;
pub use error::{CommonThreadError, Result};
pub use logging::{ChannelSink, LogEntry, LogSink, Severity, TracingSink};
pub use pool::{Diagnostics, Flow, Payload, PoolConfig, Role, UnitOfWork, WorkerContext, WorkerPool, WorkerState};
pub use queue::WorkQueue;
