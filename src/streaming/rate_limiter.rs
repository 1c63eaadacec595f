// src/streaming/rate_limiter.rs
//! Token-bucket rate limiting for one connection's send cadence
//!
//! Tokens refill continuously at `messages_per_second` up to `burst_size`;
//! each admitted send consumes one token. `acquire` never blocks: a refusal
//! tells the send loop to back off into its timed wait, so rate limiting and
//! queue draining share one wakeup cadence.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Rate limiting configuration for one connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether the limiter is consulted at all
    pub enabled: bool,

    /// Sustained token refill rate
    pub messages_per_second: f64,

    /// Bucket capacity (maximum burst)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_second: 100.0,
            burst_size: 20,
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter
///
/// The refill-and-consume step runs under one lock, so `acquire` stays
/// race-free even if invoked from multiple paths.
pub struct RateLimiter {
    capacity: f64,
    rate: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a limiter with a full bucket
    pub fn new(messages_per_second: f64, burst_size: u32) -> Self {
        let capacity = burst_size as f64;
        Self {
            capacity,
            rate: messages_per_second,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to consume one token
    ///
    /// Refills from elapsed time first, then admits if at least one full
    /// token is available. Returns false when rate-limited.
    pub fn acquire(&self) -> bool {
        let mut state = self.state.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token count after refill, for diagnostics
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;

        state.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}
