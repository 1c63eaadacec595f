// src/streaming/priority_queue.rs
//! Bounded four-level priority queue for one connection
//!
//! Four FIFO buckets, one per [`MessagePriority`], sharing a single
//! `max_size` capacity. Dequeue scans buckets from `Critical` down, so a
//! control or alarm message always overtakes queued bulk telemetry, while
//! messages of equal priority keep their enqueue order.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;

use crate::streaming::message::{MessagePriority, StreamMessage};

/// A message waiting in one priority bucket
#[derive(Debug)]
pub struct QueuedMessage {
    /// The enveloped message
    pub message: StreamMessage,

    /// When the message entered the queue
    pub enqueued_at: Instant,
}

/// Queue occupancy broken down by priority level
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PriorityDepths {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

struct QueueInner {
    buckets: [VecDeque<QueuedMessage>; 4],
    total: usize,
}

/// Bounded priority queue
pub struct PriorityQueue {
    inner: Mutex<QueueInner>,
    max_size: usize,
}

impl PriorityQueue {
    /// Create a queue with a shared capacity across all priority levels
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                buckets: [
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                ],
                total: 0,
            }),
            max_size,
        }
    }

    /// Append a message to its priority bucket
    ///
    /// Returns false without any state change when the queue is at capacity.
    pub fn put(&self, message: StreamMessage) -> bool {
        let mut inner = self.inner.lock();

        if inner.total >= self.max_size {
            return false;
        }

        let index = message.priority.index();
        inner.buckets[index].push_back(QueuedMessage {
            message,
            enqueued_at: Instant::now(),
        });
        inner.total += 1;

        true
    }

    /// Pop the oldest message from the highest non-empty priority bucket
    pub fn get(&self) -> Option<StreamMessage> {
        let mut inner = self.inner.lock();

        for priority in MessagePriority::DESCENDING {
            if let Some(queued) = inner.buckets[priority.index()].pop_front() {
                inner.total -= 1;
                return Some(queued.message);
            }
        }

        None
    }

    /// Drain the Low bucket, returning the number of evicted messages
    ///
    /// Other levels are untouched. Used by overflow handling to make room
    /// for higher-priority traffic.
    pub fn clear_low_priority(&self) -> usize {
        let mut inner = self.inner.lock();

        let index = MessagePriority::Low.index();
        let evicted = inner.buckets[index].len();
        inner.buckets[index].clear();
        inner.total -= evicted;

        evicted
    }

    /// Drain all buckets, returning the number of removed messages
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();

        let removed = inner.total;
        for bucket in inner.buckets.iter_mut() {
            bucket.clear();
        }
        inner.total = 0;

        removed
    }

    /// Total queued messages across all levels
    pub fn len(&self) -> usize {
        self.inner.lock().total
    }

    /// Queued messages at one priority level
    pub fn len_by_priority(&self, priority: MessagePriority) -> usize {
        self.inner.lock().buckets[priority.index()].len()
    }

    /// Occupancy snapshot across all levels
    pub fn depths(&self) -> PriorityDepths {
        let inner = self.inner.lock();
        PriorityDepths {
            critical: inner.buckets[MessagePriority::Critical.index()].len(),
            high: inner.buckets[MessagePriority::High.index()].len(),
            normal: inner.buckets[MessagePriority::Normal.index()].len(),
            low: inner.buckets[MessagePriority::Low.index()].len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().total == 0
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().total >= self.max_size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}
