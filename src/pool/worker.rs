//! Worker threads and the per-iteration loop driver.

use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::context::WorkerContext;
use super::{Flow, PoolInner, WorkerState};
use crate::logging::Severity;

const STATE_RUNNING: u8 = 0;
const STATE_SLEEPING: u8 = 1;
const STATE_DEAD: u8 = 2;

/// Flags a single worker shares with the pool handle
#[derive(Debug)]
pub(crate) struct WorkerControl {
    pub(crate) id: usize,
    state: AtomicU8,
    retiring: AtomicBool,
    killed: AtomicBool,
}

impl WorkerControl {
    fn new(id: usize) -> Self {
        Self {
            id,
            state: AtomicU8::new(STATE_RUNNING),
            retiring: AtomicBool::new(false),
            killed: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => WorkerState::Running,
            STATE_SLEEPING => WorkerState::Sleeping,
            _ => WorkerState::Dead,
        }
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        let raw = match state {
            WorkerState::Running => STATE_RUNNING,
            WorkerState::Sleeping => STATE_SLEEPING,
            WorkerState::Dead => STATE_DEAD,
        };
        self.state.store(raw, Ordering::Release);
    }

    /// This worker alone was asked to leave (removed or killed)
    pub(crate) fn should_exit(&self) -> bool {
        self.retiring.load(Ordering::Acquire) || self.killed.load(Ordering::Acquire)
    }
}

/// A pool slot's view of its worker thread
pub(crate) struct WorkerHandle {
    control: Arc<WorkerControl>,
    thread: Option<JoinHandle<()>>,
    exited: Receiver<()>,
}

impl WorkerHandle {
    pub(crate) fn id(&self) -> usize {
        self.control.id
    }

    pub(crate) fn state(&self) -> WorkerState {
        if self.control.killed.load(Ordering::Acquire) {
            return WorkerState::Dead;
        }
        match &self.thread {
            Some(thread) if !thread.is_finished() => self.control.state(),
            _ => WorkerState::Dead,
        }
    }

    pub(crate) fn retire(&self) {
        self.control.retiring.store(true, Ordering::Release);
    }

    /// Receiver that disconnects when the thread exits, for threads still attached
    pub(crate) fn exit_watch(&self) -> Option<(usize, Receiver<()>)> {
        if self.control.killed.load(Ordering::Acquire) {
            return None;
        }
        self.thread.as_ref().map(|_| (self.id(), self.exited.clone()))
    }

    /// Mark the slot killed and let go of its thread; true if the thread was still running
    pub(crate) fn kill(&mut self) -> bool {
        self.control.killed.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) if thread.is_finished() => {
                // Already gone; joining only collects a panic payload nobody reads.
                let _ = thread.join();
                false
            }
            // Dropping the handle detaches the thread.
            Some(_) => true,
            None => false,
        }
    }

    /// Join the thread if it has finished, logging a panic if that is how it ended
    pub(crate) fn reap(&mut self, pool: &PoolInner) {
        let finished = self
            .thread
            .as_ref()
            .is_some_and(|thread| thread.is_finished());
        if !finished {
            return;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                pool.emit(
                    Severity::Error,
                    &format!("❌ POOL: Worker {} terminated by a panic", self.id()),
                );
            }
        }
    }
}

/// Marks the worker dead however its thread ends, including unwinding from a panic
struct ExitGuard {
    control: Arc<WorkerControl>,
    _exited: Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.control.set_state(WorkerState::Dead);
    }
}

/// Spawn a worker for slot `id`; a failed spawn is logged and leaves the slot dead
pub(crate) fn spawn_worker(pool: &Arc<PoolInner>, id: usize) -> Option<WorkerHandle> {
    let control = Arc::new(WorkerControl::new(id));
    let (exited_tx, exited_rx) = bounded::<()>(0);

    let thread_pool = Arc::clone(pool);
    let thread_control = Arc::clone(&control);
    let spawned = thread::Builder::new()
        .name(format!("{}-{}-{}", pool.name, pool.role.name(), id))
        .spawn(move || run_worker_loop(thread_pool, thread_control, exited_tx));

    match spawned {
        Ok(thread) => {
            pool.emit(Severity::Debug, &format!("POOL: Created worker {id}"));
            Some(WorkerHandle {
                control,
                thread: Some(thread),
                exited: exited_rx,
            })
        }
        Err(e) => {
            pool.emit(
                Severity::Error,
                &format!("❌ POOL: Failed to spawn worker {id}: {e}"),
            );
            None
        }
    }
}

fn run_worker_loop(pool: Arc<PoolInner>, control: Arc<WorkerControl>, exited: Sender<()>) {
    let _guard = ExitGuard {
        control: Arc::clone(&control),
        _exited: exited,
    };
    let ctx = WorkerContext::new(Arc::clone(&pool), Arc::clone(&control));

    while !pool.stop.is_requested() && !control.should_exit() {
        control.set_state(WorkerState::Running);

        match (pool.unit_of_work())(&ctx) {
            Ok(Flow::Continue) => {
                pool.jobs_processed.increment();
            }
            Ok(Flow::Shutdown) => {
                pool.emit(
                    Severity::Debug,
                    &format!("POOL: Worker {} received shutdown from its unit of work", control.id),
                );
                break;
            }
            Err(e) => {
                pool.emit(
                    Severity::Error,
                    &format!("❌ POOL: Worker {} iteration failed: {e:?}", control.id),
                );
            }
        }

        if pool.deadline_passed() {
            pool.emit(
                Severity::Info,
                &format!("POOL: Worker {} reached loop deadline", control.id),
            );
            pool.signal_stop();
            break;
        }
    }
}
