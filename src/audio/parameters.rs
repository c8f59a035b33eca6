// Atomic parameters - Lock-free values shared between the scheduler and its hosts
// Stores f64 as u64 bits for atomic access

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe f64 value using atomic operations
#[derive(Debug, Clone)]
pub struct AtomicF64 {
    inner: Arc<AtomicU64>,
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self {
            inner: Arc::new(AtomicU64::new(value.to_bits())),
        }
    }

    pub fn set(&self, value: f64) {
        self.inner.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.inner.load(Ordering::Relaxed))
    }

    /// Add `delta` and return the new value
    pub fn add(&self, delta: f64) -> f64 {
        let mut current = self.inner.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .inner
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return f64::from_bits(next),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let value = AtomicF64::new(0.25);
        assert_eq!(value.get(), 0.25);
        value.set(-3.5);
        assert_eq!(value.get(), -3.5);
    }

    #[test]
    fn test_add_shared_between_clones() {
        let value = AtomicF64::new(1.0);
        let clone = value.clone();
        assert_eq!(clone.add(0.5), 1.5);
        assert_eq!(value.get(), 1.5);
    }
}
