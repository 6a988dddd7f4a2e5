//! # Controller
//!
//! Named registry of work queues and worker pools. The controller aggregates
//! status and statistics across everything registered with it and cascades
//! `shutdown()` / `kill()` to every pool, producers first, then consumers,
//! then tasks, each category in registration order.
//!
//! A `Controller` is a cheap handle around shared state: clone it into a
//! signal thread or a remote-serving thread and every clone sees the same
//! registries.
//!
//! ```rust,no_run
//! use commonthread::controller::Controller;
//! use commonthread::pool::Role;
//!
//! # fn main() -> commonthread::Result<()> {
//! let controller = Controller::new("poller");
//! controller.create_queue("readings", None);
//!
//! let config = controller.pool_config("collectors")?.with_workers(2);
//! controller.create_pool(Role::Producer, "collectors", config)?;
//!
//! println!("{}", serde_json::to_string_pretty(&controller.status()).unwrap_or_default());
//! controller.shutdown();
//! # Ok(())
//! # }
//! ```

mod registry;
mod signals;

pub use signals::{SignalAction, SignalEscalation};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use crate::config::{PoolDefaults, RuntimeConfig};
use crate::error::Result;
use crate::logging::{log_controller_operation, write_to_sink, LogSink, Severity};
use crate::pool::{Diagnostics, Payload, PoolConfig, Role, WorkerPool, WorkerState};
use crate::queue::WorkQueue;

use registry::Registry;

/// Per-category snapshot of everything registered with a controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatus {
    /// Queue name to its status line
    pub queues: BTreeMap<String, String>,
    pub producers: BTreeMap<String, Vec<WorkerState>>,
    pub consumers: BTreeMap<String, Vec<WorkerState>>,
    pub tasks: BTreeMap<String, Vec<WorkerState>>,
}

impl ControllerStatus {
    pub fn pools(&self, role: Role) -> &BTreeMap<String, Vec<WorkerState>> {
        match role {
            Role::Producer => &self.producers,
            Role::Consumer => &self.consumers,
            Role::Task => &self.tasks,
        }
    }
}

/// Jobs processed per pool, by category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub producers: BTreeMap<String, u64>,
    pub consumers: BTreeMap<String, u64>,
    pub tasks: BTreeMap<String, u64>,
}

impl ControllerStats {
    pub fn pools(&self, role: Role) -> &BTreeMap<String, u64> {
        match role {
            Role::Producer => &self.producers,
            Role::Consumer => &self.consumers,
            Role::Task => &self.tasks,
        }
    }

    /// Sum over every pool of every category
    pub fn total(&self) -> u64 {
        Role::all()
            .iter()
            .flat_map(|role| self.pools(*role).values())
            .sum()
    }
}

struct ControllerInner {
    application: String,
    log: Option<Arc<dyn LogSink>>,
    pool_defaults: PoolDefaults,
    queues: RwLock<Registry<Arc<WorkQueue<Payload>>>>,
    default_queue: RwLock<Option<Arc<WorkQueue<Payload>>>>,
    producers: RwLock<Registry<WorkerPool>>,
    consumers: RwLock<Registry<WorkerPool>>,
    tasks: RwLock<Registry<WorkerPool>>,
}

impl ControllerInner {
    fn pools(&self, role: Role) -> &RwLock<Registry<WorkerPool>> {
        match role {
            Role::Producer => &self.producers,
            Role::Consumer => &self.consumers,
            Role::Task => &self.tasks,
        }
    }

    fn emit(&self, level: Severity, message: &str) {
        match level {
            Severity::Debug => debug!(application = %self.application, "{message}"),
            Severity::Info | Severity::Notice => info!(application = %self.application, "{message}"),
            Severity::Warn => warn!(application = %self.application, "{message}"),
            Severity::Error | Severity::Fatal | Severity::Unknown => {
                error!(application = %self.application, "{message}")
            }
        }
        if let Some(sink) = &self.log {
            write_to_sink(sink.as_ref(), &self.application, level, message);
        }
    }
}

/// Registry and supervisor of named queues and pools
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("application", &self.inner.application)
            .field("queues", &self.inner.queues.read().names())
            .field("producers", &self.inner.producers.read().names())
            .field("consumers", &self.inner.consumers.read().names())
            .field("tasks", &self.inner.tasks.read().names())
            .finish()
    }
}

impl Controller {
    pub fn new(application: impl Into<String>) -> Self {
        Self::with_options(application, None, PoolDefaults::default())
    }

    /// Controller whose diagnostics and pools also write to `log`
    pub fn with_log(application: impl Into<String>, log: Arc<dyn LogSink>) -> Self {
        Self::with_options(application, Some(log), PoolDefaults::default())
    }

    /// Controller named and defaulted from loaded runtime configuration
    pub fn from_config(config: &RuntimeConfig, log: Option<Arc<dyn LogSink>>) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_options(
            config.application.clone(),
            log,
            config.pools.clone(),
        ))
    }

    pub fn with_options(
        application: impl Into<String>,
        log: Option<Arc<dyn LogSink>>,
        pool_defaults: PoolDefaults,
    ) -> Self {
        let application = application.into();
        log_controller_operation("new", &application, "controller", None, "created");
        Self {
            inner: Arc::new(ControllerInner {
                application,
                log,
                pool_defaults,
                queues: RwLock::new(Registry::default()),
                default_queue: RwLock::new(None),
                producers: RwLock::new(Registry::default()),
                consumers: RwLock::new(Registry::default()),
                tasks: RwLock::new(Registry::default()),
            }),
        }
    }

    pub fn application(&self) -> &str {
        &self.inner.application
    }

    // ---- queues ----

    /// Register `queue` under `name`; it also becomes the default queue
    ///
    /// An existing queue of the same name is replaced, not drained.
    pub fn add_queue(&self, name: &str, queue: Arc<WorkQueue<Payload>>) -> Arc<WorkQueue<Payload>> {
        self.inner
            .emit(Severity::Debug, &format!("Controller: Add Queue {name}"));
        let replaced = self.inner.queues.write().insert(name, Arc::clone(&queue));
        *self.inner.default_queue.write() = Some(Arc::clone(&queue));

        log_controller_operation(
            "add",
            &self.inner.application,
            "queue",
            Some(name),
            if replaced.is_some() { "replaced" } else { "added" },
        );
        queue
    }

    /// Create and register a queue; `None` capacity means unbounded
    pub fn create_queue(&self, name: &str, capacity: Option<usize>) -> Arc<WorkQueue<Payload>> {
        self.add_queue(name, Arc::new(WorkQueue::with_capacity(capacity)))
    }

    pub fn find_queue(&self, name: &str) -> Option<Arc<WorkQueue<Payload>>> {
        self.inner
            .emit(Severity::Debug, &format!("Controller: Find Queue {name}"));
        self.inner.queues.read().get(name)
    }

    /// Unregister a queue; pools bound to it keep their handle
    pub fn del_queue(&self, name: &str) -> Option<Arc<WorkQueue<Payload>>> {
        self.inner
            .emit(Severity::Debug, &format!("Controller: Delete Queue {name}"));
        let removed = self.inner.queues.write().remove(name)?;

        let mut default_queue = self.inner.default_queue.write();
        if default_queue
            .as_ref()
            .is_some_and(|queue| Arc::ptr_eq(queue, &removed))
        {
            *default_queue = None;
        }

        log_controller_operation("del", &self.inner.application, "queue", Some(name), "removed");
        Some(removed)
    }

    /// Queue bound by `create_pool` when its config names none
    pub fn default_queue(&self) -> Option<Arc<WorkQueue<Payload>>> {
        self.inner.default_queue.read().clone()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.inner.queues.read().names()
    }

    pub fn queue_status(&self) -> BTreeMap<String, String> {
        self.inner
            .queues
            .read()
            .snapshot()
            .into_iter()
            .map(|(name, queue)| (name, queue.status()))
            .collect()
    }

    // ---- pools ----

    /// Pool config seeded with this controller's defaults, application and log sink
    pub fn pool_config(&self, name: &str) -> Result<PoolConfig> {
        let mut config = PoolConfig::from_defaults(name, &self.inner.pool_defaults)?
            .with_application(self.inner.application.clone());
        config.log = self.inner.log.clone();
        Ok(config)
    }

    /// Register an already started pool under `name`
    ///
    /// An existing pool of the same name is replaced without being shut down.
    pub fn add_pool(&self, role: Role, name: &str, pool: WorkerPool) -> WorkerPool {
        self.inner
            .emit(Severity::Debug, &format!("Controller: Add {role} {name}"));
        let replaced = self.inner.pools(role).write().insert(name, pool.clone());
        if replaced.is_some() {
            self.inner.emit(
                Severity::Warn,
                &format!("⚠️ Controller: Replaced {role} {name} without shutting it down"),
            );
        }
        log_controller_operation(
            "add",
            &self.inner.application,
            role.name(),
            Some(name),
            if replaced.is_some() { "replaced" } else { "added" },
        );
        pool
    }

    /// Start a pool from `config` and register it under `name`
    ///
    /// Fills in what the config leaves open: the default queue, the
    /// controller's log sink, and for tasks a diagnostics handle back onto
    /// this controller.
    pub fn create_pool(&self, role: Role, name: &str, mut config: PoolConfig) -> Result<WorkerPool> {
        config.name = name.to_string();
        if config.queue.is_none() {
            config.queue = self.default_queue();
        }
        if config.log.is_none() {
            config.log = self.inner.log.clone();
        }
        if role == Role::Task && config.diagnostics.is_none() {
            config.diagnostics = Some(Arc::new(ControllerDiagnostics {
                inner: Arc::downgrade(&self.inner),
            }));
        }

        let pool = WorkerPool::start(role, config)?;
        Ok(self.add_pool(role, name, pool))
    }

    pub fn find_pool(&self, role: Role, name: &str) -> Option<WorkerPool> {
        self.inner
            .emit(Severity::Debug, &format!("Controller: Find {role} {name}"));
        self.inner.pools(role).read().get(name)
    }

    /// Unregister a pool; its workers keep running until the caller stops them
    pub fn del_pool(&self, role: Role, name: &str) -> Option<WorkerPool> {
        self.inner
            .emit(Severity::Debug, &format!("Controller: Delete {role} {name}"));
        let removed = self.inner.pools(role).write().remove(name);
        if removed.is_some() {
            log_controller_operation(
                "del",
                &self.inner.application,
                role.name(),
                Some(name),
                "removed",
            );
        }
        removed
    }

    pub fn pool_names(&self, role: Role) -> Vec<String> {
        self.inner.pools(role).read().names()
    }

    pub fn pool_count(&self) -> usize {
        Role::all()
            .iter()
            .map(|role| self.inner.pools(*role).read().len())
            .sum()
    }

    pub fn add_producer(&self, name: &str, pool: WorkerPool) -> WorkerPool {
        self.add_pool(Role::Producer, name, pool)
    }

    pub fn find_producer(&self, name: &str) -> Option<WorkerPool> {
        self.find_pool(Role::Producer, name)
    }

    pub fn del_producer(&self, name: &str) -> Option<WorkerPool> {
        self.del_pool(Role::Producer, name)
    }

    pub fn add_consumer(&self, name: &str, pool: WorkerPool) -> WorkerPool {
        self.add_pool(Role::Consumer, name, pool)
    }

    pub fn find_consumer(&self, name: &str) -> Option<WorkerPool> {
        self.find_pool(Role::Consumer, name)
    }

    pub fn del_consumer(&self, name: &str) -> Option<WorkerPool> {
        self.del_pool(Role::Consumer, name)
    }

    pub fn add_task(&self, name: &str, pool: WorkerPool) -> WorkerPool {
        self.add_pool(Role::Task, name, pool)
    }

    pub fn find_task(&self, name: &str) -> Option<WorkerPool> {
        self.find_pool(Role::Task, name)
    }

    pub fn del_task(&self, name: &str) -> Option<WorkerPool> {
        self.del_pool(Role::Task, name)
    }

    // ---- aggregates ----

    /// Pools of one role in registration order, copied out so no lock is held
    fn pools_snapshot(&self, role: Role) -> Vec<(String, WorkerPool)> {
        self.inner.pools(role).read().snapshot()
    }

    pub fn pool_status(&self, role: Role) -> BTreeMap<String, Vec<WorkerState>> {
        self.pools_snapshot(role)
            .into_iter()
            .map(|(name, pool)| (name, pool.status()))
            .collect()
    }

    pub fn pool_stats(&self, role: Role) -> BTreeMap<String, u64> {
        self.pools_snapshot(role)
            .into_iter()
            .map(|(name, pool)| (name, pool.stats()))
            .collect()
    }

    pub fn status(&self) -> ControllerStatus {
        self.inner.emit(Severity::Debug, "Controller: Status Called");
        ControllerStatus {
            queues: self.queue_status(),
            producers: self.pool_status(Role::Producer),
            consumers: self.pool_status(Role::Consumer),
            tasks: self.pool_status(Role::Task),
        }
    }

    pub fn stats(&self) -> ControllerStats {
        self.inner.emit(Severity::Debug, "Controller: Stats Called");
        ControllerStats {
            producers: self.pool_stats(Role::Producer),
            consumers: self.pool_stats(Role::Consumer),
            tasks: self.pool_stats(Role::Task),
        }
    }

    /// Live workers across every registered pool
    pub fn live_workers(&self) -> usize {
        Role::all()
            .iter()
            .flat_map(|role| self.pools_snapshot(*role))
            .map(|(_, pool)| pool.live_workers())
            .sum()
    }

    // ---- lifecycle ----

    /// Gracefully stop every pool: producers, then consumers, then tasks
    pub fn shutdown(&self) {
        self.inner
            .emit(Severity::Info, "🛑 Controller: Shutting down all pools");
        for role in Role::all() {
            self.shutdown_role(role);
        }
        log_controller_operation("shutdown", &self.inner.application, "all", None, "stopped");
    }

    /// Forcefully stop every pool in the same order as `shutdown()`
    pub fn kill(&self) {
        self.inner
            .emit(Severity::Info, "💀 Controller: Killing all pools");
        for role in Role::all() {
            self.kill_role(role);
        }
        log_controller_operation("kill", &self.inner.application, "all", None, "killed");
    }

    pub fn shutdown_role(&self, role: Role) {
        for (name, pool) in self.pools_snapshot(role) {
            self.inner
                .emit(Severity::Debug, &format!("Controller: Shutdown {role} {name}"));
            pool.shutdown();
        }
    }

    pub fn kill_role(&self, role: Role) {
        for (name, pool) in self.pools_snapshot(role) {
            self.inner
                .emit(Severity::Debug, &format!("Controller: Kill {role} {name}"));
            pool.kill();
        }
    }

    /// Shut down one pool by name; false if no such pool is registered
    pub fn shutdown_pool(&self, role: Role, name: &str) -> bool {
        match self.find_pool(role, name) {
            Some(pool) => {
                pool.shutdown();
                true
            }
            None => false,
        }
    }

    /// Kill one pool by name; false if no such pool is registered
    pub fn kill_pool(&self, role: Role, name: &str) -> bool {
        match self.find_pool(role, name) {
            Some(pool) => {
                pool.kill();
                true
            }
            None => false,
        }
    }

    /// Respawn dead workers in every pool; returns how many were respawned
    pub fn refresh(&self) -> usize {
        let refreshed: usize = Role::all()
            .iter()
            .flat_map(|role| self.pools_snapshot(*role))
            .map(|(_, pool)| pool.refresh())
            .sum();
        if refreshed > 0 {
            self.inner.emit(
                Severity::Info,
                &format!("🔄 Controller: Refreshed {refreshed} workers"),
            );
        }
        refreshed
    }
}

/// Diagnostics handle given to task pools; weak so tasks do not keep the controller alive
struct ControllerDiagnostics {
    inner: Weak<ControllerInner>,
}

impl ControllerDiagnostics {
    fn controller(&self) -> Option<Controller> {
        self.inner.upgrade().map(|inner| Controller { inner })
    }
}

impl Diagnostics for ControllerDiagnostics {
    fn status_report(&self) -> serde_json::Value {
        self.controller()
            .and_then(|controller| serde_json::to_value(controller.status()).ok())
            .unwrap_or_default()
    }

    fn stats_report(&self) -> serde_json::Value {
        self.controller()
            .and_then(|controller| serde_json::to_value(controller.stats()).ok())
            .unwrap_or_default()
    }
}
