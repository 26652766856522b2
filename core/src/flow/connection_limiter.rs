use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::warn;

/// Non-blocking counting semaphore capping concurrent connections.
#[derive(Debug)]
pub struct ConnectionLimiter {
    active: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max,
        }
    }

    /// Take one slot, returning false when full rather than queueing.
    pub fn try_acquire(&self) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < self.max {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Free one slot. A release without a matching acquire is logged and
    /// dropped; the count never goes negative.
    pub fn release(&self) {
        let result = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        if result.is_err() {
            warn!("attempted to release more connections than acquired");
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}
