// src/streaming/message.rs
//! Message envelope and streaming enums
//!
//! Every message that enters the streaming core is wrapped in a
//! [`StreamMessage`] envelope carrying its delivery priority, wire
//! compression, and creation timestamp as typed fields. The payload itself
//! is an opaque ordered JSON mapping built by the producer (acquisition
//! engine, alarm monitor, equipment poller) and is never interpreted here
//! beyond the conventional `"type"` key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::errors::{Result, StreamError};

/// Delivery priority attached to every streamed message
///
/// Ordering is `Low < Normal < High < Critical`; the priority queue drains
/// strictly from `Critical` down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Critical,
}

impl MessagePriority {
    /// All levels in drain order (highest first)
    pub const DESCENDING: [MessagePriority; 4] = [
        MessagePriority::Critical,
        MessagePriority::High,
        MessagePriority::Normal,
        MessagePriority::Low,
    ];

    /// Bucket index used by the priority queue
    pub fn index(&self) -> usize {
        match self {
            MessagePriority::Low => 0,
            MessagePriority::Normal => 1,
            MessagePriority::High => 2,
            MessagePriority::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::Low => "low",
            MessagePriority::Normal => "normal",
            MessagePriority::High => "high",
            MessagePriority::Critical => "critical",
        }
    }
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

/// Per-message wire compression algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// Identity transform, payload is sent as a plain structured frame
    None,

    /// Gzip stream, sent as a binary frame
    Gzip,

    /// Zlib stream, sent as a binary frame
    Zlib,
}

impl CompressionKind {
    /// All supported kinds, in wire-byte order
    pub const ALL: [CompressionKind; 3] = [
        CompressionKind::None,
        CompressionKind::Gzip,
        CompressionKind::Zlib,
    ];

    /// One-byte wire encoding used as the binary frame prefix
    pub fn as_byte(&self) -> u8 {
        match self {
            CompressionKind::None => 0,
            CompressionKind::Gzip => 1,
            CompressionKind::Zlib => 2,
        }
    }

    /// Decode the binary frame prefix byte
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(CompressionKind::None),
            1 => Ok(CompressionKind::Gzip),
            2 => Ok(CompressionKind::Zlib),
            other => Err(StreamError::CompressionFailed(format!(
                "unknown compression prefix byte: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Gzip => "gzip",
            CompressionKind::Zlib => "zlib",
        }
    }
}

impl Default for CompressionKind {
    fn default() -> Self {
        CompressionKind::None
    }
}

/// Envelope around one streamed message
///
/// Created by the producer-facing API, copied into exactly one connection's
/// queue per destination, and consumed once by that connection's send loop
/// (or dropped under backpressure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Delivery priority, fixed for the message lifetime
    pub priority: MessagePriority,

    /// Wire compression chosen by the caller or per-connection metadata
    pub compression: CompressionKind,

    /// Creation timestamp
    pub timestamp: DateTime<Utc>,

    /// Opaque ordered payload, owned by the producer
    pub payload: Map<String, Value>,
}

impl StreamMessage {
    /// Create a message with default priority and no compression
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            priority: MessagePriority::Normal,
            compression: CompressionKind::None,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Create a message from any JSON value
    ///
    /// Non-object values are wrapped under a `"data"` key so the payload is
    /// always a mapping.
    pub fn from_value(value: Value) -> Self {
        let payload = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self::new(payload)
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_compression(mut self, compression: CompressionKind) -> Self {
        self.compression = compression;
        self
    }

    /// Conventional `"type"` key of the payload, for logs and recordings
    pub fn message_type(&self) -> &str {
        self.payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    /// Serialize the payload to a JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.payload).map_err(|e| {
            StreamError::SerializationFailed(format!("payload serialization error: {}", e))
        })
    }
}
