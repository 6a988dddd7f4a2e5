//! Per-worker view of the pool handed to every unit of work.

use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::worker::WorkerControl;
use super::{Diagnostics, Payload, PoolInner, Role, WorkerState};
use crate::counter::Counter;
use crate::error::{CommonThreadError, Result};
use crate::logging::Severity;
use crate::queue::WorkQueue;
use crate::scheduler;

/// What a unit of work can see and do from inside a worker
///
/// All blocking helpers here are interruptible: they return early once the
/// pool is shut down or this worker is removed or killed, and the worker
/// reports `sleeping` while parked in them.
pub struct WorkerContext {
    pool: Arc<PoolInner>,
    control: Arc<WorkerControl>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("pool", &self.pool.name)
            .field("role", &self.pool.role)
            .field("worker_id", &self.control.id)
            .finish()
    }
}

impl WorkerContext {
    pub(crate) fn new(pool: Arc<PoolInner>, control: Arc<WorkerControl>) -> Self {
        Self { pool, control }
    }

    /// Stable slot id of this worker within its pool
    pub fn worker_id(&self) -> usize {
        self.control.id
    }

    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }

    pub fn role(&self) -> Role {
        self.pool.role
    }

    pub fn queue(&self) -> Option<&Arc<WorkQueue<Payload>>> {
        self.pool.queue.as_ref()
    }

    pub fn jobs_processed(&self) -> &Counter {
        &self.pool.jobs_processed
    }

    pub fn diagnostics(&self) -> Option<&Arc<dyn Diagnostics>> {
        self.pool.diagnostics.as_ref()
    }

    /// True once the pool is shutting down or this worker was removed or killed
    pub fn should_stop(&self) -> bool {
        self.pool.stop.is_requested() || self.control.should_exit()
    }

    /// Log through the pool's tracing fields and configured sink
    pub fn log(&self, level: Severity, message: impl AsRef<str>) {
        self.pool.emit(level, message.as_ref());
    }

    /// Sleep for `duration`; false if interrupted by a stop request
    pub fn sleep(&self, duration: Duration) -> bool {
        self.sleep_until_instant(Instant::now() + duration)
    }

    /// Sleep until the next natural boundary of `interval`; false if interrupted
    pub fn every(&self, interval: Duration) -> bool {
        let wait = scheduler::duration_until_next_interval(Local::now().time(), interval);
        self.sleep(wait)
    }

    /// Sleep until `target` (tomorrow if already past); false if interrupted
    pub fn at(&self, target: DateTime<Local>) -> bool {
        let now = Local::now();
        let target = scheduler::next_occurrence(target, now);
        self.sleep(scheduler::duration_between(now, target))
    }

    /// Take the next item from the bound queue, blocking until one arrives
    ///
    /// `Ok(None)` means the wait was cancelled by a stop request.
    pub fn dequeue(&self) -> Result<Option<Payload>> {
        let queue = self.bound_queue()?;
        self.control.set_state(WorkerState::Sleeping);
        let item = queue.dequeue_or_cancel(|| self.should_stop());
        self.control.set_state(WorkerState::Running);
        Ok(item)
    }

    /// Put an item on the bound queue, blocking while it is full
    ///
    /// `Ok(false)` means the wait was cancelled and the item was dropped.
    pub fn enqueue(&self, item: Payload) -> Result<bool> {
        let queue = self.bound_queue()?;
        self.control.set_state(WorkerState::Sleeping);
        let accepted = queue.enqueue_or_cancel(item, || self.should_stop()).is_ok();
        self.control.set_state(WorkerState::Running);
        Ok(accepted)
    }

    fn bound_queue(&self) -> Result<&Arc<WorkQueue<Payload>>> {
        self.pool
            .queue
            .as_ref()
            .ok_or_else(|| CommonThreadError::no_queue_bound(self.pool.name.clone()))
    }

    fn sleep_until_instant(&self, deadline: Instant) -> bool {
        self.control.set_state(WorkerState::Sleeping);
        let completed = self.pool.stop.sleep_until(deadline, || self.should_stop());
        self.control.set_state(WorkerState::Running);
        completed
    }
}
