pub mod connection_limiter;
pub mod token_bucket;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use connection_limiter::ConnectionLimiter;
use token_bucket::TokenBucket;

/// Monotonic admission counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowControlStats {
    pub total_requests: u64,
    pub rate_limited: u64,
    pub connection_limited: u64,
    pub accepted: u64,
}

/// Outcome of one admission check.
#[derive(Debug)]
pub enum AccessOutcome {
    /// Holds the connection slot; dropping it releases exactly once.
    Accepted(ConnectionGuard),
    RateLimited,
    ConnectionLimited,
}

impl AccessOutcome {
    pub fn reason(&self) -> &'static str {
        match self {
            AccessOutcome::Accepted(_) => "accepted",
            AccessOutcome::RateLimited => "rate_limited",
            AccessOutcome::ConnectionLimited => "connection_limited",
        }
    }
}

/// RAII release of a streaming connection slot. The response body owns the
/// guard, so the slot frees when the stream finishes, errors, or the
/// client disconnects.
#[derive(Debug)]
pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

/// Two-stage admission controller for streaming requests: a token bucket
/// bounds request rate, a counting semaphore bounds concurrency.
#[derive(Debug)]
pub struct StreamGate {
    bucket: TokenBucket,
    connections: Arc<ConnectionLimiter>,
    stats: Mutex<FlowControlStats>,
}

impl StreamGate {
    /// Bucket capacity is twice the refill rate, refilled once per second;
    /// the bucket starts full, so bursts of `2 * tokens_per_second` pass.
    pub fn new(max_connections: usize, tokens_per_second: usize) -> Self {
        Self {
            bucket: TokenBucket::new(
                tokens_per_second as u64 * 2,
                tokens_per_second as u64,
                Duration::from_secs(1),
            ),
            connections: Arc::new(ConnectionLimiter::new(max_connections)),
            stats: Mutex::new(FlowControlStats::default()),
        }
    }

    /// Ordered admission: the cheap token check runs first. A token spent
    /// on a request that then fails the connection check is not refunded;
    /// both accepts and rejects stay bounded by the bucket.
    pub fn check_access(&self) -> AccessOutcome {
        {
            let mut stats = self.stats.lock().expect("flow stats lock poisoned");
            stats.total_requests += 1;
        }

        if !self.bucket.try_take() {
            let mut stats = self.stats.lock().expect("flow stats lock poisoned");
            stats.rate_limited += 1;
            return AccessOutcome::RateLimited;
        }

        if !self.connections.try_acquire() {
            let mut stats = self.stats.lock().expect("flow stats lock poisoned");
            stats.connection_limited += 1;
            return AccessOutcome::ConnectionLimited;
        }

        let mut stats = self.stats.lock().expect("flow stats lock poisoned");
        stats.accepted += 1;
        AccessOutcome::Accepted(ConnectionGuard {
            limiter: Arc::clone(&self.connections),
        })
    }

    pub fn stats(&self) -> FlowControlStats {
        self.stats.lock().expect("flow stats lock poisoned").clone()
    }

    pub fn active_connections(&self) -> usize {
        self.connections.active()
    }

    pub fn max_connections(&self) -> usize {
        self.connections.max()
    }

    pub fn available_tokens(&self) -> u64 {
        self.bucket.available()
    }

    /// Counter snapshot plus live token and connection occupancy.
    pub fn detailed_stats(&self) -> serde_json::Value {
        json!({
            "requests": self.stats(),
            "tokens": {
                "available": self.bucket.available(),
                "capacity": self.bucket.capacity(),
            },
            "connections": {
                "active": self.connections.active(),
                "max": self.connections.max(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_and_release() {
        let gate = StreamGate::new(2, 100);

        let first = gate.check_access();
        assert!(matches!(first, AccessOutcome::Accepted(_)));
        assert_eq!(gate.active_connections(), 1);

        drop(first);
        assert_eq!(gate.active_connections(), 0);

        let stats = gate.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.rate_limited, 0);
        assert_eq!(stats.connection_limited, 0);
    }

    #[test]
    fn test_rate_limit_before_connection_limit() {
        // Capacity 2, one connection slot. Exhaust the bucket first.
        let gate = StreamGate::new(1, 1);

        let a = gate.check_access();
        assert!(matches!(a, AccessOutcome::Accepted(_)));
        // Second token goes to a request that loses the connection race.
        let b = gate.check_access();
        assert!(matches!(b, AccessOutcome::ConnectionLimited));
        // Bucket is now empty: rate limiting fires before connection check.
        let c = gate.check_access();
        assert!(matches!(c, AccessOutcome::RateLimited));

        let stats = gate.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.connection_limited, 1);
        assert_eq!(stats.rate_limited, 1);
    }

    #[test]
    fn test_connection_reject_does_not_refund_token() {
        let gate = StreamGate::new(1, 5); // capacity 10
        let held = gate.check_access();
        assert!(matches!(held, AccessOutcome::Accepted(_)));

        let rejected = gate.check_access();
        assert!(matches!(rejected, AccessOutcome::ConnectionLimited));

        // Two tokens gone: one accepted, one consumed by the reject.
        assert_eq!(gate.available_tokens(), 8);
    }

    #[test]
    fn test_slot_reusable_after_guard_drop() {
        let gate = StreamGate::new(1, 100);
        let first = gate.check_access();
        assert!(matches!(first, AccessOutcome::Accepted(_)));
        assert!(matches!(
            gate.check_access(),
            AccessOutcome::ConnectionLimited
        ));
        drop(first);
        assert!(matches!(gate.check_access(), AccessOutcome::Accepted(_)));
    }

    #[test]
    fn test_detailed_stats_shape() {
        let gate = StreamGate::new(4, 2);
        let _guard = gate.check_access();
        let stats = gate.detailed_stats();
        assert_eq!(stats["connections"]["max"], 4);
        assert_eq!(stats["connections"]["active"], 1);
        assert_eq!(stats["tokens"]["capacity"], 4);
        assert_eq!(stats["requests"]["accepted"], 1);
    }

    #[test]
    fn test_reason_strings() {
        let gate = StreamGate::new(0, 1);
        assert_eq!(gate.check_access().reason(), "connection_limited");
        let gate = StreamGate::new(1, 100);
        assert_eq!(gate.check_access().reason(), "accepted");
    }
}
