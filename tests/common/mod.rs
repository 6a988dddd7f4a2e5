//! Shared helpers for integration tests.

#![allow(dead_code)]

use commonthread::pool::{Flow, WorkerContext};
use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_for<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Unit of work that sleeps interruptibly and counts each completed sleep
pub fn sleep_for(duration: Duration) -> impl Fn(&WorkerContext) -> anyhow::Result<Flow> + Send + Sync + 'static {
    move |ctx: &WorkerContext| {
        if ctx.sleep(duration) {
            Ok(Flow::Continue)
        } else {
            Ok(Flow::Shutdown)
        }
    }
}
