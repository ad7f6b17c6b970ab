//! Live-updatable shared values.
//!
//! Rate parameters can be hot-swapped while callers are mid-wait; `ArcSwap`
//! gives lock-free reads on the admission path.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// Cheap-to-read, atomically replaceable value.
#[derive(Debug)]
pub struct Adaptive<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for Adaptive<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> Adaptive<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }
}

impl<T: Copy> Adaptive<T> {
    /// Copy out the current value.
    pub fn load(&self) -> T {
        **self.inner.load()
    }
}
