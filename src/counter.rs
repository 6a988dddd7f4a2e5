//! Thread-safe job counter.

use parking_lot::Mutex;

/// Monotonically incrementable counter shared by every worker in a pool
///
/// All mutations go through a single lock. Increments from different workers
/// are serialized, so the final total is exact even though their relative
/// order is unspecified.
#[derive(Debug, Default)]
pub struct Counter {
    value: Mutex<u64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one and return the new value; stays at `u64::MAX` once reached
    pub fn increment(&self) -> u64 {
        let mut value = self.value.lock();
        *value = value.saturating_add(1);
        *value
    }

    pub fn read(&self) -> u64 {
        *self.value.lock()
    }

    /// Reset to zero, returning zero
    pub fn reset(&self) -> u64 {
        self.set(0)
    }

    /// Overwrite the current value, returning it
    pub fn set(&self, value: u64) -> u64 {
        let mut current = self.value.lock();
        *current = value;
        *current
    }
}
