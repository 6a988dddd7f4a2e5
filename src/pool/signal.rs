//! Pool-wide stop flag with an interruptible sleep.
//!
//! The flag is the single source of truth workers read every iteration. The
//! condvar only exists so that sleeping workers notice a stop request without
//! waiting out their full timer.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub(crate) struct StopSignal {
    requested: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub(crate) fn request(&self) {
        self.requested.store(true, Ordering::Release);
        self.notify_all();
    }

    pub(crate) fn clear(&self) {
        self.requested.store(false, Ordering::Release);
    }

    /// Wake every sleeper so it re-evaluates its stop predicate
    ///
    /// Taking the lock orders this wake-up after any sleeper that already
    /// checked its predicate, so no wake-up is lost.
    pub(crate) fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }

    /// Sleep until `deadline` unless `should_stop` turns true first
    ///
    /// Returns true when the full sleep elapsed, false when interrupted.
    pub(crate) fn sleep_until<F>(&self, deadline: Instant, should_stop: F) -> bool
    where
        F: Fn() -> bool,
    {
        let mut guard = self.lock.lock();
        loop {
            if should_stop() {
                return false;
            }
            if Instant::now() >= deadline {
                return true;
            }
            self.condvar.wait_until(&mut guard, deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_full_sleep_completes() {
        let signal = StopSignal::new();
        let started = Instant::now();
        assert!(signal.sleep_until(started + Duration::from_millis(30), || false));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_request_interrupts_sleep() {
        let signal = Arc::new(StopSignal::new());
        let sleeper = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let started = Instant::now();
                let completed = signal.sleep_until(started + Duration::from_secs(30), || {
                    signal.is_requested()
                });
                (completed, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        signal.request();

        let (completed, elapsed) = sleeper.join().unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_clear_resets_flag() {
        let signal = StopSignal::new();
        signal.request();
        assert!(signal.is_requested());
        signal.clear();
        assert!(!signal.is_requested());
    }
}
