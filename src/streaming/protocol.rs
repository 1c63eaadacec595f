// src/streaming/protocol.rs
//! Typed control and server message protocol
//!
//! Client control messages arrive as JSON objects with a `type` field and
//! are validated here into the closed [`ClientRequest`] sum type; unknown
//! types or enum values are rejected at this boundary with a typed error
//! instead of surfacing deep inside a send loop.
//!
//! Server-to-client payloads are built by the constructors below so every
//! outbound message shape lives in one place.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::streaming::message::{CompressionKind, MessagePriority};
use crate::utils::config::StreamConfig;
use crate::utils::errors::{Result, StreamError};

fn default_interval_ms() -> u64 {
    1000
}

/// Control messages accepted from clients
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Subscribe to live telemetry from one piece of equipment
    StartStream {
        equipment_id: String,
        stream_type: String,
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
        #[serde(default)]
        priority: MessagePriority,
        #[serde(default)]
        compression: CompressionKind,
    },

    StopStream {
        equipment_id: String,
        stream_type: String,
    },

    /// Subscribe to live acquisition/statistics updates
    StartAcquisitionStream {
        acquisition_id: String,
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
        #[serde(default)]
        num_samples: Option<u64>,
        #[serde(default)]
        priority: MessagePriority,
        #[serde(default)]
        compression: CompressionKind,
    },

    StopAcquisitionStream {
        acquisition_id: String,
    },

    StartRecording {
        session_id: String,
        #[serde(default)]
        metadata: Map<String, Value>,
    },

    StopRecording {
        session_id: String,
    },

    /// Set this connection's default compression
    SetCompression {
        compression: CompressionKind,
    },

    /// Set this connection's default priority
    SetPriority {
        priority: MessagePriority,
    },

    GetStats {},

    Ping {},
}

impl ClientRequest {
    /// Parse and validate a raw control message
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| StreamError::InvalidRequest(e.to_string()))
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// `capabilities` payload sent once on connect (High priority)
pub fn capabilities(config: &StreamConfig) -> Map<String, Value> {
    object(json!({
        "type": "capabilities",
        "features": {
            "compression": ["none", "gzip", "zlib"],
            "priorities": ["low", "normal", "high", "critical"],
            "recording": ["json", "jsonl", "csv", "binary"],
            "backpressure": {
                "max_queue_size": config.backpressure.max_queue_size,
                "drop_low_priority": config.backpressure.drop_low_priority,
                "rate_limit": {
                    "enabled": config.rate_limit.enabled,
                    "messages_per_second": config.rate_limit.messages_per_second,
                    "burst_size": config.rate_limit.burst_size,
                },
            },
        },
    }))
}

/// Live telemetry update for one equipment stream
pub fn stream_data(equipment_id: &str, stream_type: &str, data: Value) -> Map<String, Value> {
    object(json!({
        "type": "stream_data",
        "equipment_id": equipment_id,
        "stream_type": stream_type,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Live acquisition update
pub fn acquisition_stream(
    acquisition_id: &str,
    state: &str,
    stats: Value,
    data: Value,
) -> Map<String, Value> {
    object(json!({
        "type": "acquisition_stream",
        "acquisition_id": acquisition_id,
        "state": state,
        "stats": stats,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub fn stream_started(equipment_id: &str, stream_type: &str) -> Map<String, Value> {
    object(json!({
        "type": "stream_started",
        "equipment_id": equipment_id,
        "stream_type": stream_type,
    }))
}

pub fn stream_stopped(equipment_id: &str, stream_type: &str) -> Map<String, Value> {
    object(json!({
        "type": "stream_stopped",
        "equipment_id": equipment_id,
        "stream_type": stream_type,
    }))
}

pub fn acquisition_stream_started(acquisition_id: &str) -> Map<String, Value> {
    object(json!({
        "type": "acquisition_stream_started",
        "acquisition_id": acquisition_id,
    }))
}

pub fn acquisition_stream_stopped(acquisition_id: &str) -> Map<String, Value> {
    object(json!({
        "type": "acquisition_stream_stopped",
        "acquisition_id": acquisition_id,
    }))
}

pub fn recording_started(session_id: &str, filepath: &str) -> Map<String, Value> {
    object(json!({
        "type": "recording_started",
        "session_id": session_id,
        "filepath": filepath,
    }))
}

pub fn recording_stopped<S: Serialize>(session_id: &str, stats: &S) -> Map<String, Value> {
    object(json!({
        "type": "recording_stopped",
        "session_id": session_id,
        "stats": stats,
    }))
}

/// Combined per-connection and global statistics report
pub fn stats<C: Serialize, G: Serialize>(connection: &C, global: &G) -> Map<String, Value> {
    object(json!({
        "type": "stats",
        "connection": connection,
        "global": global,
    }))
}

pub fn pong() -> Map<String, Value> {
    object(json!({
        "type": "pong",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub fn error(message: &str) -> Map<String, Value> {
    object(json!({
        "type": "error",
        "error": message,
    }))
}
