//! # Runtime Constants
//!
//! Defaults and operational boundaries shared by pools, the controller and
//! the configuration loader.

use std::time::Duration;

/// Default application name used in log entries and diagnostics
pub const DEFAULT_APPLICATION: &str = "CommonThread";

/// Workers spawned by a pool when the caller does not say otherwise
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Upper bound on workers in a single pool
pub const MAX_WORKERS_PER_POOL: usize = 1024;

/// How long `shutdown()` waits for each worker to leave its loop
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Pacing of the default producer loop
pub const DEFAULT_PRODUCER_INTERVAL: Duration = Duration::from_secs(5);

/// Pacing of the default consumer loop when no queue is bound
pub const DEFAULT_CONSUMER_IDLE_INTERVAL: Duration = Duration::from_secs(30);

/// Time of day at which the default task loop reports controller status
pub const DEFAULT_TASK_DAILY_AT: &str = "17:00";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "COMMONTHREAD";

/// Separator for nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Seconds in a day
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Thread name used by the signal listener
pub const SIGNAL_THREAD_NAME: &str = "commonthread-signals";
