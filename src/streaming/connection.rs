// src/streaming/connection.rs
//! Client connections and the transport seam
//!
//! The physical channel (websocket, TLS, framing) lives below this crate;
//! the core talks to it through [`StreamTransport`]. Each
//! [`ClientConnection`] exclusively owns its transport handle and its
//! [`BackpressureHandler`]; neither is shared across connections.
//!
//! Lifecycle: `Connecting → Open → Closing → Closed`, no reopen. A
//! reconnecting client gets a fresh connection object.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::streaming::backpressure::{BackpressureHandler, BackpressureStats};
use crate::streaming::message::{CompressionKind, MessagePriority};
use crate::utils::errors::Result;

/// Lifecycle state of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// The wire beneath one connection
///
/// Implemented by the websocket layer in production and by in-memory mocks
/// in tests. Uncompressed messages go out as plain structured frames via
/// `send_json`; compressed messages as binary frames via `send_binary`.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Transport-level handshake, performed once during connect
    async fn handshake(&self) -> Result<()>;

    /// Send a plain structured frame
    async fn send_json(&self, payload: &Value) -> Result<()>;

    /// Send a binary frame (1-byte compression prefix + compressed payload)
    async fn send_binary(&self, frame: Bytes) -> Result<()>;

    /// Close the underlying channel
    async fn close(&self) -> Result<()>;
}

/// One live client connection
pub struct ClientConnection {
    /// Caller-assigned connection id
    pub id: String,

    transport: Arc<dyn StreamTransport>,
    metadata: RwLock<Map<String, Value>>,
    backpressure: Arc<BackpressureHandler>,
    state: RwLock<ConnectionState>,
    cancel: CancellationToken,
    send_task: Mutex<Option<JoinHandle<()>>>,
    connected_at: DateTime<Utc>,
}

impl ClientConnection {
    pub fn new(
        id: String,
        transport: Arc<dyn StreamTransport>,
        metadata: Map<String, Value>,
        backpressure: Arc<BackpressureHandler>,
    ) -> Self {
        Self {
            id,
            transport,
            metadata: RwLock::new(metadata),
            backpressure,
            state: RwLock::new(ConnectionState::Connecting),
            cancel: CancellationToken::new(),
            send_task: Mutex::new(None),
            connected_at: Utc::now(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn StreamTransport> {
        &self.transport
    }

    pub fn backpressure(&self) -> &Arc<BackpressureHandler> {
        &self.backpressure
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Token cancelled when the connection is torn down
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn set_send_task(&self, handle: JoinHandle<()>) {
        *self.send_task.lock() = Some(handle);
    }

    pub(crate) fn take_send_task(&self) -> Option<JoinHandle<()>> {
        self.send_task.lock().take()
    }

    /// Snapshot of the metadata map
    pub fn metadata(&self) -> Map<String, Value> {
        self.metadata.read().clone()
    }

    pub fn metadata_field(&self, key: &str) -> Option<Value> {
        self.metadata.read().get(key).cloned()
    }

    pub fn set_metadata_field(&self, key: &str, value: Value) {
        self.metadata.write().insert(key.to_string(), value);
    }

    /// Connection-default compression, settable via `set_compression`
    pub fn default_compression(&self) -> CompressionKind {
        self.metadata_field("compression")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(CompressionKind::None)
    }

    /// Connection-default priority, settable via `set_priority`
    pub fn default_priority(&self) -> MessagePriority {
        self.metadata_field("priority")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(MessagePriority::Normal)
    }

    /// Reporting snapshot
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            state: self.state(),
            connected_at: self.connected_at,
            metadata: self.metadata(),
            backpressure: self.backpressure.stats(),
        }
    }
}

/// Serializable view of one connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub state: ConnectionState,
    pub connected_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    pub backpressure: BackpressureStats,
}
