//! Per-sensor sample FIFO between the producer callback and the UI tick.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::Sample;

/// Unbounded FIFO. `push` comes from the device callback thread, `drain` from the
/// consumer tick; the lock is held only for a `Vec::push` or a pointer swap.
#[derive(Debug, Default)]
pub struct SampleQueue {
    inner: Mutex<Vec<Sample>>,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking consumer must not stop the producer from queueing.
    fn lock(&self) -> MutexGuard<'_, Vec<Sample>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, sample: Sample) {
        self.lock().push(sample);
    }

    /// Takes everything queued so far, oldest first. Empty when nothing is pending.
    pub fn drain(&self) -> Vec<Sample> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
