// src/streaming/backpressure.rs
//! Per-connection backpressure: bounded queue + rate limiter + statistics
//!
//! One [`BackpressureHandler`] per connection gives producers a single
//! admission decision (`queue_message`) and the send loop a single
//! withdrawal operation (`get_next_message`). A slow client fills its own
//! queue and, at worst, sheds its own Low-priority traffic; it can never
//! stall other connections or grow memory without bound.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::streaming::message::StreamMessage;
use crate::streaming::priority_queue::{PriorityDepths, PriorityQueue};
use crate::streaming::rate_limiter::{RateLimitConfig, RateLimiter};

/// Backpressure configuration for one connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Whether admission control is active; disabled means every message is
    /// admitted without queueing
    pub enabled: bool,

    /// Shared queue capacity across all priority levels
    pub max_queue_size: usize,

    /// Fraction of `max_queue_size` at which a diagnostic warning fires
    pub warning_threshold: f64,

    /// Evict Low-priority entries when the queue is full
    pub drop_low_priority: bool,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_queue_size: 1000,
            warning_threshold: 0.8,
            drop_low_priority: true,
        }
    }
}

#[derive(Default)]
struct HandlerCounters {
    messages_queued: AtomicU64,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    queue_overflows: AtomicU64,
    rate_limit_hits: AtomicU64,
}

/// Snapshot of one connection's backpressure state
#[derive(Debug, Clone, Serialize)]
pub struct BackpressureStats {
    pub messages_queued: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub queue_overflows: u64,
    pub rate_limit_hits: u64,
    pub queue_depth: usize,
    pub max_queue_size: usize,
    pub depth_by_priority: PriorityDepths,
}

/// Admission control for one connection
pub struct BackpressureHandler {
    config: BackpressureConfig,
    queue: PriorityQueue,
    limiter: Option<RateLimiter>,
    counters: HandlerCounters,
    wakeup: Notify,
    above_warning: AtomicBool,
}

impl BackpressureHandler {
    pub fn new(config: BackpressureConfig, rate_limit: RateLimitConfig) -> Self {
        let limiter = if rate_limit.enabled {
            Some(RateLimiter::new(
                rate_limit.messages_per_second,
                rate_limit.burst_size,
            ))
        } else {
            None
        };

        let queue = PriorityQueue::new(config.max_queue_size);

        Self {
            config,
            queue,
            limiter,
            counters: HandlerCounters::default(),
            wakeup: Notify::new(),
            above_warning: AtomicBool::new(false),
        }
    }

    /// Admit a message into the queue
    ///
    /// When the queue is full and `drop_low_priority` is set, all Low
    /// entries are evicted (counted as drops) before retrying. A rejection
    /// increments `queue_overflows` and `messages_dropped` and returns
    /// false; the caller may retry or accept the drop.
    pub fn queue_message(&self, message: StreamMessage) -> bool {
        if !self.config.enabled {
            return true;
        }

        if self.queue.is_full() && self.config.drop_low_priority {
            let evicted = self.queue.clear_low_priority();
            if evicted > 0 {
                self.counters
                    .messages_dropped
                    .fetch_add(evicted as u64, Ordering::Relaxed);
                debug!("Evicted {} low-priority messages under queue pressure", evicted);
            }
        }

        let admitted = self.queue.put(message);

        if admitted {
            self.counters.messages_queued.fetch_add(1, Ordering::Relaxed);
            self.wakeup.notify_one();
        } else {
            self.counters.queue_overflows.fetch_add(1, Ordering::Relaxed);
            self.counters.messages_dropped.fetch_add(1, Ordering::Relaxed);
        }

        self.check_warning_threshold();

        admitted
    }

    /// Withdraw the next deliverable message
    ///
    /// Returns None when the queue is empty or the rate limiter refuses a
    /// token (counted in `rate_limit_hits`); the send loop backs off into
    /// its timed wait in either case.
    pub fn get_next_message(&self) -> Option<StreamMessage> {
        if self.queue.is_empty() {
            return None;
        }

        if let Some(limiter) = &self.limiter {
            if !limiter.acquire() {
                self.counters.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        let message = self.queue.get();
        if message.is_some() {
            self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        }

        message
    }

    /// Resolves when a new message has been enqueued
    ///
    /// The send loop waits on this instead of polling at a fixed interval;
    /// a timed fallback in the loop covers the rate-limited case.
    pub async fn notified(&self) {
        self.wakeup.notified().await;
    }

    /// Snapshot of counters and queue occupancy
    pub fn stats(&self) -> BackpressureStats {
        BackpressureStats {
            messages_queued: self.counters.messages_queued.load(Ordering::Relaxed),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.counters.messages_dropped.load(Ordering::Relaxed),
            queue_overflows: self.counters.queue_overflows.load(Ordering::Relaxed),
            rate_limit_hits: self.counters.rate_limit_hits.load(Ordering::Relaxed),
            queue_depth: self.queue.len(),
            max_queue_size: self.queue.capacity(),
            depth_by_priority: self.queue.depths(),
        }
    }

    /// Reset all counters to zero
    pub fn reset_stats(&self) {
        self.counters.messages_queued.store(0, Ordering::Relaxed);
        self.counters.messages_sent.store(0, Ordering::Relaxed);
        self.counters.messages_dropped.store(0, Ordering::Relaxed);
        self.counters.queue_overflows.store(0, Ordering::Relaxed);
        self.counters.rate_limit_hits.store(0, Ordering::Relaxed);
    }

    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }

    fn check_warning_threshold(&self) {
        let threshold =
            (self.config.max_queue_size as f64 * self.config.warning_threshold) as usize;
        if threshold == 0 {
            return;
        }

        let depth = self.queue.len();
        if depth >= threshold {
            // Warn once per crossing, not on every enqueue above the line
            if !self.above_warning.swap(true, Ordering::Relaxed) {
                warn!(
                    "Queue depth {} crossed warning threshold {} (max {})",
                    depth, threshold, self.config.max_queue_size
                );
            }
        } else {
            self.above_warning.store(false, Ordering::Relaxed);
        }
    }
}
