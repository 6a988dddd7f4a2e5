//! # Worker Pool Management
//!
//! A pool owns a set of OS threads ("workers"), each repeatedly running the
//! same unit of work until the pool is shut down, killed, or its deadline
//! passes. Producer, Consumer and Task are the same engine; the role only
//! picks the default unit of work used when the caller supplies none.
//!
//! Worker slot ids are stable for the life of a pool. Removing workers retires
//! the top slots instead of compacting the table, and `refresh()` respawns any
//! slot below the target count whose thread has died.
//!
//! ```rust,no_run
//! use commonthread::pool::{Flow, PoolConfig, Role, WorkerPool};
//! use commonthread::queue::WorkQueue;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> commonthread::Result<()> {
//! let queue = Arc::new(WorkQueue::unbounded());
//! let consumers = WorkerPool::start(
//!     Role::Consumer,
//!     PoolConfig::new("printers")
//!         .with_workers(4)
//!         .with_queue(Arc::clone(&queue))
//!         .with_unit_of_work(|ctx| match ctx.dequeue()? {
//!             Some(item) => {
//!                 println!("{item}");
//!                 Ok(Flow::Continue)
//!             }
//!             None => Ok(Flow::Shutdown),
//!         }),
//! )?;
//!
//! queue.enqueue(serde_json::json!({"device": "cmts-1"}));
//! std::thread::sleep(Duration::from_millis(100));
//! consumers.shutdown();
//! # Ok(())
//! # }
//! ```

mod context;
mod defaults;
mod signal;
mod worker;

pub use context::WorkerContext;

use chrono::{DateTime, Local, NaiveTime};
use crossbeam::channel::RecvTimeoutError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PoolDefaults;
use crate::constants::{
    DEFAULT_APPLICATION, DEFAULT_CONSUMER_IDLE_INTERVAL, DEFAULT_PRODUCER_INTERVAL,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_WORKER_COUNT, MAX_WORKERS_PER_POOL,
};
use crate::counter::Counter;
use crate::error::{CommonThreadError, Result};
use crate::logging::{log_pool_operation, write_to_sink, LogSink, Severity};
use crate::queue::WorkQueue;

use signal::StopSignal;
use worker::WorkerHandle;

/// Opaque value carried on work queues between pools
pub type Payload = serde_json::Value;

/// Function executed once per loop iteration by every worker in a pool
///
/// An `Err` is an iteration failure: it is logged, not counted, and the loop
/// carries on with the next iteration.
pub type UnitOfWork = Arc<dyn Fn(&WorkerContext) -> anyhow::Result<Flow> + Send + Sync>;

/// Selects the default unit of work of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Producer,
    Consumer,
    Task,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
            Role::Task => "task",
        }
    }

    /// Every role, in controller cascade order
    pub fn all() -> [Role; 3] {
        [Role::Producer, Role::Consumer, Role::Task]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Observed state of one worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Executing its unit of work
    Running,
    /// Parked in an interruptible wait (schedule, sleep, or queue)
    Sleeping,
    /// No live thread in this slot
    Dead,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Running => "running",
            WorkerState::Sleeping => "sleeping",
            WorkerState::Dead => "dead",
        }
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self, WorkerState::Dead)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a unit of work tells the loop driver after a successful iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Count the iteration and keep looping
    Continue,
    /// Leave the loop without counting this iteration
    Shutdown,
}

/// Aggregated status source handed to Task pools for their daily report
pub trait Diagnostics: Send + Sync {
    fn status_report(&self) -> serde_json::Value;
    fn stats_report(&self) -> serde_json::Value;
}

/// Configuration for a single pool
#[derive(Clone)]
pub struct PoolConfig {
    pub name: String,
    /// Application name stamped on entries sent to `log`
    pub application: String,
    pub worker_count: usize,
    pub queue: Option<Arc<WorkQueue<Payload>>>,
    pub log: Option<Arc<dyn LogSink>>,
    /// Workers stop on their own once an iteration finishes after this instant
    pub loop_until: Option<DateTime<Local>>,
    pub unit_of_work: Option<UnitOfWork>,
    /// Per-worker wait during `shutdown()`
    pub shutdown_timeout: Duration,
    pub producer_interval: Duration,
    pub consumer_idle_interval: Duration,
    pub task_daily_at: NaiveTime,
    pub diagnostics: Option<Arc<dyn Diagnostics>>,
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("name", &self.name)
            .field("application", &self.application)
            .field("worker_count", &self.worker_count)
            .field("queue", &self.queue.as_ref().map(|q| q.status()))
            .field("log", &self.log.as_ref().map(|_| "LogSink"))
            .field("loop_until", &self.loop_until)
            .field("unit_of_work", &self.unit_of_work.as_ref().map(|_| "custom"))
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("producer_interval", &self.producer_interval)
            .field("consumer_idle_interval", &self.consumer_idle_interval)
            .field("task_daily_at", &self.task_daily_at)
            .field("diagnostics", &self.diagnostics.as_ref().map(|_| "Diagnostics"))
            .finish()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            application: DEFAULT_APPLICATION.to_string(),
            worker_count: DEFAULT_WORKER_COUNT,
            queue: None,
            log: None,
            loop_until: None,
            unit_of_work: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            producer_interval: DEFAULT_PRODUCER_INTERVAL,
            consumer_idle_interval: DEFAULT_CONSUMER_IDLE_INTERVAL,
            task_daily_at: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            diagnostics: None,
        }
    }
}

impl PoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Build a config from loaded runtime defaults
    pub fn from_defaults(name: impl Into<String>, defaults: &PoolDefaults) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            worker_count: defaults.worker_count,
            shutdown_timeout: defaults.shutdown_timeout(),
            producer_interval: defaults.producer_interval(),
            consumer_idle_interval: defaults.consumer_idle_interval(),
            task_daily_at: defaults.task_daily_at()?,
            ..Self::default()
        })
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    pub fn with_queue(mut self, queue: Arc<WorkQueue<Payload>>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_loop_until(mut self, deadline: DateTime<Local>) -> Self {
        self.loop_until = Some(deadline);
        self
    }

    pub fn with_unit_of_work<F>(mut self, unit_of_work: F) -> Self
    where
        F: Fn(&WorkerContext) -> anyhow::Result<Flow> + Send + Sync + 'static,
    {
        self.unit_of_work = Some(Arc::new(unit_of_work));
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_producer_interval(mut self, interval: Duration) -> Self {
        self.producer_interval = interval;
        self
    }

    pub fn with_consumer_idle_interval(mut self, interval: Duration) -> Self {
        self.consumer_idle_interval = interval;
        self
    }

    pub fn with_task_daily_at(mut self, at: NaiveTime) -> Self {
        self.task_daily_at = at;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count > MAX_WORKERS_PER_POOL {
            return Err(CommonThreadError::invalid_pool(format!(
                "worker_count {} exceeds the maximum of {}",
                self.worker_count, MAX_WORKERS_PER_POOL
            )));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(CommonThreadError::invalid_pool(
                "shutdown_timeout must be greater than zero",
            ));
        }
        if self.unit_of_work.is_none()
            && (self.producer_interval.is_zero() || self.consumer_idle_interval.is_zero())
        {
            return Err(CommonThreadError::invalid_pool(
                "default loop intervals must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
struct SlotTable {
    workers: Vec<Option<WorkerHandle>>,
    target: usize,
}

impl SlotTable {
    fn install(&mut self, id: usize, handle: Option<WorkerHandle>) {
        if id >= self.workers.len() {
            self.workers.resize_with(id + 1, || None);
        }
        if let Some(previous) = self.workers[id].as_mut() {
            previous.kill();
        }
        self.workers[id] = handle;
    }

    fn is_dead(&self, id: usize) -> bool {
        self.workers
            .get(id)
            .and_then(Option::as_ref)
            .map_or(true, |worker| !worker.state().is_alive())
    }
}

/// State shared between a pool handle and its worker threads
pub(crate) struct PoolInner {
    id: Uuid,
    pub(crate) name: String,
    pub(crate) role: Role,
    pub(crate) application: String,
    pub(crate) queue: Option<Arc<WorkQueue<Payload>>>,
    log: Option<Arc<dyn LogSink>>,
    loop_until: Option<DateTime<Local>>,
    unit_of_work: UnitOfWork,
    pub(crate) jobs_processed: Counter,
    pub(crate) stop: StopSignal,
    pub(crate) diagnostics: Option<Arc<dyn Diagnostics>>,
    slots: Mutex<SlotTable>,
    shutdown_timeout: Duration,
    created_at: Instant,
}

impl PoolInner {
    /// Trace a pool event and forward it to the configured sink
    pub(crate) fn emit(&self, level: Severity, message: &str) {
        match level {
            Severity::Debug => debug!(pool = %self.name, role = %self.role, "{message}"),
            Severity::Info | Severity::Notice => {
                info!(pool = %self.name, role = %self.role, "{message}")
            }
            Severity::Warn => warn!(pool = %self.name, role = %self.role, "{message}"),
            Severity::Error | Severity::Fatal | Severity::Unknown => {
                error!(pool = %self.name, role = %self.role, "{message}")
            }
        }
        if let Some(sink) = &self.log {
            write_to_sink(sink.as_ref(), &self.application, level, message);
        }
    }

    /// Raise the pool-wide stop flag and release every blocked worker
    pub(crate) fn signal_stop(&self) {
        self.stop.request();
        self.wake_blocked();
    }

    fn wake_blocked(&self) {
        self.stop.notify_all();
        if let Some(queue) = &self.queue {
            queue.wake_all();
        }
    }

    pub(crate) fn deadline_passed(&self) -> bool {
        self.loop_until
            .is_some_and(|deadline| Local::now() >= deadline)
    }

    pub(crate) fn unit_of_work(&self) -> &UnitOfWork {
        &self.unit_of_work
    }
}

/// Handle to a running pool of workers
///
/// Cloning the handle shares the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("role", &self.inner.role)
            .field("target_worker_count", &self.target_worker_count())
            .field("jobs_processed", &self.stats())
            .finish()
    }
}

impl WorkerPool {
    /// Validate the config and spawn `worker_count` workers immediately
    pub fn start(role: Role, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let unit_of_work = match &config.unit_of_work {
            Some(custom) => Arc::clone(custom),
            None => defaults::default_unit_of_work(role, &config),
        };

        let name = if config.name.is_empty() {
            format!("{}-{}", role.name(), Uuid::new_v4().simple())
        } else {
            config.name.clone()
        };

        let inner = Arc::new(PoolInner {
            id: Uuid::new_v4(),
            name,
            role,
            application: config.application.clone(),
            queue: config.queue.clone(),
            log: config.log.clone(),
            loop_until: config.loop_until,
            unit_of_work,
            jobs_processed: Counter::new(),
            stop: StopSignal::new(),
            diagnostics: config.diagnostics.clone(),
            slots: Mutex::new(SlotTable::default()),
            shutdown_timeout: config.shutdown_timeout,
            created_at: Instant::now(),
        });

        let pool = Self { inner };
        {
            let mut table = pool.inner.slots.lock();
            for id in 0..config.worker_count {
                table.install(id, worker::spawn_worker(&pool.inner, id));
            }
            table.target = config.worker_count;
        }

        log_pool_operation(
            "start",
            &pool.inner.name,
            role.name(),
            Some(config.worker_count),
            "started",
            None,
        );
        pool.inner.emit(
            Severity::Info,
            &format!("🚀 POOL: Started {} {} workers", config.worker_count, role),
        );

        Ok(pool)
    }

    pub fn producer(config: PoolConfig) -> Result<Self> {
        Self::start(Role::Producer, config)
    }

    pub fn consumer(config: PoolConfig) -> Result<Self> {
        Self::start(Role::Consumer, config)
    }

    pub fn task(config: PoolConfig) -> Result<Self> {
        Self::start(Role::Task, config)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn queue(&self) -> Option<&Arc<WorkQueue<Payload>>> {
        self.inner.queue.as_ref()
    }

    pub fn jobs_processed(&self) -> &Counter {
        &self.inner.jobs_processed
    }

    pub fn uptime(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    /// Desired steady-state worker count
    pub fn target_worker_count(&self) -> usize {
        self.inner.slots.lock().target
    }

    /// Number of slots ever allocated, live or dead
    pub fn slot_count(&self) -> usize {
        self.inner.slots.lock().workers.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.stop.is_requested()
    }

    /// State of every worker slot, indexed by slot id
    pub fn status(&self) -> Vec<WorkerState> {
        self.inner.emit(Severity::Debug, "POOL: Status called");
        let table = self.inner.slots.lock();
        table
            .workers
            .iter()
            .map(|slot| slot.as_ref().map_or(WorkerState::Dead, WorkerHandle::state))
            .collect()
    }

    /// Count of slots with a live worker
    pub fn live_workers(&self) -> usize {
        self.status().iter().filter(|state| state.is_alive()).count()
    }

    /// Iterations completed without error
    pub fn stats(&self) -> u64 {
        self.inner.jobs_processed.read()
    }

    /// Ask every worker to stop and wait a bounded time for each to leave its loop
    ///
    /// Workers finish the iteration they are in. Workers still running after
    /// the per-worker timeout are logged and left alone; escalate with
    /// [`WorkerPool::kill`].
    pub fn shutdown(&self) {
        self.inner.emit(Severity::Info, "🛑 POOL: Shutting down");
        self.inner.signal_stop();

        let pending: Vec<_> = {
            let table = self.inner.slots.lock();
            table
                .workers
                .iter()
                .flatten()
                .filter_map(WorkerHandle::exit_watch)
                .collect()
        };

        let mut timed_out = 0;
        for (id, exited) in pending {
            match exited.recv_timeout(self.inner.shutdown_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                Err(RecvTimeoutError::Timeout) => {
                    timed_out += 1;
                    self.inner.emit(
                        Severity::Warn,
                        &format!(
                            "⚠️ POOL: Worker {} did not exit within {:?}",
                            id, self.inner.shutdown_timeout
                        ),
                    );
                }
            }
        }

        self.reap();
        log_pool_operation(
            "shutdown",
            &self.inner.name,
            self.inner.role.name(),
            Some(self.live_workers()),
            if timed_out == 0 { "stopped" } else { "timed_out" },
            None,
        );
    }

    /// Stop now: signal like `shutdown()`, then detach every worker without waiting
    ///
    /// Slots report `dead` as soon as this returns. A detached thread leaves
    /// its loop at its next stop check and never resumes, even after `restart()`.
    pub fn kill(&self) {
        self.inner.emit(Severity::Info, "💀 POOL: Killing workers");
        self.inner.signal_stop();

        let mut detached = 0;
        {
            let mut table = self.inner.slots.lock();
            for worker in table.workers.iter_mut().flatten() {
                if worker.kill() {
                    detached += 1;
                }
            }
        }

        if detached > 0 {
            self.inner.emit(
                Severity::Warn,
                &format!("⚠️ POOL: Detached {detached} workers still in their loop"),
            );
        }
        log_pool_operation(
            "kill",
            &self.inner.name,
            self.inner.role.name(),
            Some(detached),
            "killed",
            None,
        );
    }

    /// Respawn `target_worker_count` workers after a shutdown
    ///
    /// No-op returning zero while the pool is running. Returns the number of
    /// workers spawned.
    pub fn restart(&self) -> usize {
        if !self.inner.stop.is_requested() {
            return 0;
        }

        self.inner
            .emit(Severity::Info, "🔄 POOL: Restarting after shutdown");

        let mut table = self.inner.slots.lock();
        // Stragglers from a timed-out shutdown must not resume once the flag clears.
        for worker in table.workers.iter_mut().flatten() {
            worker.kill();
        }
        self.inner.stop.clear();

        let target = table.target;
        for id in 0..target {
            table.install(id, worker::spawn_worker(&self.inner, id));
        }
        target
    }

    /// Spawn `count` more workers at the next slot ids; returns the new target
    pub fn add(&self, count: usize) -> usize {
        let mut table = self.inner.slots.lock();
        let available = MAX_WORKERS_PER_POOL.saturating_sub(table.target);
        if count > available {
            self.inner.emit(
                Severity::Warn,
                &format!(
                    "POOL: Asked to add {} workers but only {} fit under the limit of {}",
                    count, available, MAX_WORKERS_PER_POOL
                ),
            );
        }
        let count = count.min(available);
        let start = table.target;

        for id in start..start + count {
            table.install(id, worker::spawn_worker(&self.inner, id));
        }
        table.target += count;

        self.inner.emit(
            Severity::Info,
            &format!("🔼 POOL: Added {} workers (target: {})", count, table.target),
        );
        table.target
    }

    /// Retire the top `count` slots without waiting; returns the new target
    pub fn remove(&self, count: usize) -> usize {
        let target = {
            let mut table = self.inner.slots.lock();
            if count > table.target {
                self.inner.emit(
                    Severity::Warn,
                    &format!(
                        "POOL: Asked to remove {} workers but only {} are targeted",
                        count, table.target
                    ),
                );
            }
            let count = count.min(table.target);
            let new_target = table.target - count;

            for id in (new_target..table.target).rev() {
                if let Some(Some(worker)) = table.workers.get(id) {
                    worker.retire();
                }
            }
            table.target = new_target;
            new_target
        };

        self.inner.wake_blocked();
        self.inner.emit(
            Severity::Info,
            &format!("🔽 POOL: Removing workers (target: {target})"),
        );
        target
    }

    /// Respawn dead slots below the target count; returns how many were respawned
    pub fn refresh(&self) -> usize {
        if self.inner.stop.is_requested() {
            return 0;
        }

        let mut refreshed = 0;
        {
            let mut table = self.inner.slots.lock();
            for id in 0..table.target {
                if table.is_dead(id) {
                    self.inner.emit(
                        Severity::Warn,
                        &format!("⚠️ POOL: Worker {id} appears to be dead . . refreshing"),
                    );
                    if let Some(Some(worker)) = table.workers.get_mut(id) {
                        worker.reap(&self.inner);
                    }
                    table.install(id, worker::spawn_worker(&self.inner, id));
                    refreshed += 1;
                }
            }
        }

        self.inner
            .emit(Severity::Debug, &format!("POOL: Refreshed {refreshed} workers"));
        refreshed
    }

    /// Join threads that have already finished
    fn reap(&self) {
        let mut table = self.inner.slots.lock();
        for worker in table.workers.iter_mut().flatten() {
            worker.reap(&self.inner);
        }
    }
}
