use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token bucket rate limiter with lazy, whole-interval refill.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    refill_rate: u64,
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Starts full.
    pub fn new(capacity: u64, refill_rate: u64, refill_interval: Duration) -> Self {
        Self {
            capacity,
            refill_rate,
            refill_interval,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Consume one token if available.
    pub fn try_take(&self) -> bool {
        let mut state = self.state.lock().expect("token bucket lock poisoned");
        self.refill(&mut state);
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    pub fn available(&self) -> u64 {
        let mut state = self.state.lock().expect("token bucket lock poisoned");
        self.refill(&mut state);
        state.tokens
    }

    /// Add `refill_rate` tokens per whole elapsed interval, capped at
    /// capacity. `last_refill` advances by whole intervals only, so
    /// fractional elapsed time carries into the next refill.
    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed();
        if elapsed < self.refill_interval {
            return;
        }
        let intervals = (elapsed.as_nanos() / self.refill_interval.as_nanos()) as u32;
        let added = u64::from(intervals).saturating_mul(self.refill_rate);
        state.tokens = state.tokens.saturating_add(added).min(self.capacity);
        state.last_refill += self.refill_interval * intervals;
    }
}
