// src/streaming/manager.rs
//! Top-level streaming orchestrator
//!
//! The [`StreamManager`] owns the set of live connections, gives each one a
//! private [`BackpressureHandler`] and a dedicated send loop, and exposes
//! `send_to_client`/`broadcast` to producers. It is a cheap-to-clone handle
//! over shared state: construct one at process start, hand clones to every
//! producer, and call `shutdown` for a testable teardown.
//!
//! # Architecture
//!
//! ```text
//! Producer → send_to_client/broadcast → BackpressureHandler (per conn)
//!                                              ↓ notify
//!                                         Send Loop (task per conn)
//!                                              ↓
//!                                  compress? → StreamTransport
//!                                              ↓
//!                                     StreamRecorder (active sessions)
//! ```
//!
//! No global lock serializes connections: the id → connection map is a
//! concurrent map, and everything else is per-connection. A slow or broken
//! client only ever affects itself.

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::recording::recorder::{RecordingStats, StreamRecorder};
use crate::streaming::backpressure::{BackpressureHandler, BackpressureStats};
use crate::streaming::compressor::Compressor;
use crate::streaming::connection::{
    ClientConnection, ConnectionInfo, ConnectionState, StreamTransport,
};
use crate::streaming::message::{CompressionKind, MessagePriority, StreamMessage};
use crate::streaming::protocol::{self, ClientRequest};
use crate::utils::config::StreamConfig;
use crate::utils::errors::{Result, StreamError};

#[derive(Default)]
struct RatioAccumulator {
    sum: f64,
    count: u64,
}

struct GlobalCounters {
    total_connections: AtomicU64,
    total_messages_sent: AtomicU64,
    total_bytes_sent: AtomicU64,
    compression: Mutex<RatioAccumulator>,
}

impl GlobalCounters {
    fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            total_messages_sent: AtomicU64::new(0),
            total_bytes_sent: AtomicU64::new(0),
            compression: Mutex::new(RatioAccumulator::default()),
        }
    }

    fn record_ratio(&self, ratio: f64) {
        let mut acc = self.compression.lock();
        acc.sum += ratio;
        acc.count += 1;
    }

    fn average_ratio(&self) -> f64 {
        let acc = self.compression.lock();
        if acc.count == 0 {
            1.0
        } else {
            acc.sum / acc.count as f64
        }
    }
}

/// Aggregated manager-wide statistics
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    /// Connections accepted since startup
    pub total_connections: u64,

    /// Currently registered connections
    pub active_connections: usize,

    pub total_messages_sent: u64,
    pub total_bytes_sent: u64,

    /// Running average over all compressed transmits
    pub average_compression_ratio: f64,

    pub active_recordings: usize,
}

/// Streaming orchestrator handle
#[derive(Clone)]
pub struct StreamManager {
    config: StreamConfig,
    connections: Arc<DashMap<String, Arc<ClientConnection>>>,
    recorder: Arc<StreamRecorder>,
    compressor: Arc<Compressor>,
    stats: Arc<GlobalCounters>,
}

impl StreamManager {
    pub fn new(config: StreamConfig) -> Self {
        let recorder = Arc::new(StreamRecorder::new(config.recording.clone()));
        Self {
            config,
            connections: Arc::new(DashMap::new()),
            recorder,
            compressor: Arc::new(Compressor::default()),
            stats: Arc::new(GlobalCounters::new()),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Register a connection and start its send loop
    ///
    /// Performs the transport handshake, registers the connection (an
    /// existing one under the same id is disconnected first), and queues the
    /// High-priority `capabilities` message describing what this server
    /// supports.
    pub async fn connect(
        &self,
        id: &str,
        transport: Arc<dyn StreamTransport>,
        metadata: Map<String, Value>,
    ) -> Result<()> {
        if let Some((_, stale)) = self.connections.remove(id) {
            warn!("Connection id {} already registered, replacing", id);
            self.teardown(&stale, true).await;
        }

        transport
            .handshake()
            .await
            .map_err(|e| StreamError::TransportFailed(format!("handshake with {}: {}", id, e)))?;

        let handler = Arc::new(BackpressureHandler::new(
            self.config.backpressure.clone(),
            self.config.rate_limit.clone(),
        ));
        let conn = Arc::new(ClientConnection::new(
            id.to_string(),
            transport,
            metadata,
            handler,
        ));
        conn.set_state(ConnectionState::Open);

        self.connections.insert(id.to_string(), Arc::clone(&conn));
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);

        let task = tokio::spawn(Self::run_send_loop(self.clone(), Arc::clone(&conn)));
        conn.set_send_task(task);

        let capabilities = StreamMessage::new(protocol::capabilities(&self.config))
            .with_priority(MessagePriority::High);
        if !conn.backpressure().queue_message(capabilities) {
            warn!("Failed to queue capabilities message for {}", id);
        }

        info!("Client {} connected", id);
        Ok(())
    }

    /// Tear down a connection
    ///
    /// Idempotent: disconnecting an unknown id is a no-op.
    pub async fn disconnect(&self, id: &str) {
        if let Some((_, conn)) = self.connections.remove(id) {
            self.teardown(&conn, true).await;
            info!("Client {} disconnected", id);
        }
    }

    async fn teardown(&self, conn: &Arc<ClientConnection>, await_send_task: bool) {
        conn.set_state(ConnectionState::Closing);
        conn.cancel_token().cancel();

        if await_send_task {
            if let Some(task) = conn.take_send_task() {
                let _ = task.await;
            }
        }

        if let Err(e) = conn.transport().close().await {
            debug!("Error closing transport for {}: {}", conn.id, e);
        }
        conn.set_state(ConnectionState::Closed);
    }

    /// Queue a message for one connection
    ///
    /// `CompressionKind::None` defers to the connection's default set via
    /// `set_compression`. Returns false when the connection does not exist
    /// or its backpressure handler rejects the message.
    pub fn send_to_client(
        &self,
        id: &str,
        payload: Map<String, Value>,
        priority: MessagePriority,
        compression: CompressionKind,
    ) -> bool {
        let Some(conn) = self.connections.get(id).map(|entry| Arc::clone(entry.value()))
        else {
            debug!("send_to_client: unknown connection {}", id);
            return false;
        };

        let effective = if compression == CompressionKind::None {
            conn.default_compression()
        } else {
            compression
        };

        let message = StreamMessage::new(payload)
            .with_priority(priority)
            .with_compression(effective);

        conn.backpressure().queue_message(message)
    }

    /// Queue a message for every connection not in `exclude`
    ///
    /// Not atomic across connections: a rejection on one never prevents
    /// delivery attempts to the others. Returns the number of connections
    /// that admitted the message.
    pub fn broadcast(
        &self,
        payload: Map<String, Value>,
        priority: MessagePriority,
        compression: CompressionKind,
        exclude: &[&str],
    ) -> usize {
        let ids: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        ids.iter()
            .filter(|id| !exclude.contains(&id.as_str()))
            .filter(|id| self.send_to_client(id, payload.clone(), priority, compression))
            .count()
    }

    /// Dedicated send loop for one connection
    ///
    /// Runs until cancellation or a transport failure. Waits on the enqueue
    /// notification when nothing is deliverable, with a timed fallback so a
    /// rate-limited queue is retried without a fresh enqueue.
    async fn run_send_loop(manager: StreamManager, conn: Arc<ClientConnection>) {
        let cancel = conn.cancel_token();
        let idle_wait = Duration::from_millis(manager.config.idle_wait_ms.max(1));
        debug!("Send loop started for connection {}", conn.id);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match conn.backpressure().get_next_message() {
                Some(message) => {
                    if let Err(e) = manager.transmit(&conn, &message).await {
                        warn!(
                            "Transmit failed for connection {}, disconnecting: {}",
                            conn.id, e
                        );
                        manager.connections.remove(&conn.id);
                        manager.teardown(&conn, false).await;
                        break;
                    }
                    manager.recorder.record_to_all(&message);
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = conn.backpressure().notified() => {}
                        _ = tokio::time::sleep(idle_wait) => {}
                    }
                }
            }
        }

        debug!("Send loop stopped for connection {}", conn.id);
    }

    async fn transmit(&self, conn: &ClientConnection, message: &StreamMessage) -> Result<()> {
        let text = message.to_json()?;

        let bytes_sent = match message.compression {
            CompressionKind::None => {
                let value = Value::Object(message.payload.clone());
                conn.transport().send_json(&value).await?;
                text.len()
            }
            kind => {
                let compressed = self.compressor.compress(&text, kind)?;
                let ratio = Compressor::compression_ratio(&text, &compressed);
                let frame = Compressor::encode_frame(kind, compressed);
                let frame_len = frame.len();
                conn.transport().send_binary(frame).await?;
                self.stats.record_ratio(ratio);
                frame_len
            }
        };

        self.stats.total_messages_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_sent
            .fetch_add(bytes_sent as u64, Ordering::Relaxed);

        Ok(())
    }

    /// Parse and dispatch one client control message
    ///
    /// Transport-layer requests (ping, stats, defaults, recording) are
    /// serviced here. Equipment and acquisition stream requests belong to
    /// external collaborators and are returned to the caller. A malformed
    /// request produces an `error` message to that client and an Err.
    pub fn handle_client_message(
        &self,
        id: &str,
        text: &str,
    ) -> Result<Option<ClientRequest>> {
        let request = match ClientRequest::parse(text) {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid control message from {}: {}", id, e);
                self.send_to_client(
                    id,
                    protocol::error(&e.to_string()),
                    MessagePriority::Normal,
                    CompressionKind::None,
                );
                return Err(e);
            }
        };

        match request {
            ClientRequest::Ping {} => {
                self.send_to_client(
                    id,
                    protocol::pong(),
                    MessagePriority::High,
                    CompressionKind::None,
                );
                Ok(None)
            }
            ClientRequest::GetStats {} => {
                let connection = self.get_backpressure_stats(id);
                let global = self.get_global_stats();
                self.send_to_client(
                    id,
                    protocol::stats(&connection, &global),
                    MessagePriority::Normal,
                    CompressionKind::None,
                );
                Ok(None)
            }
            ClientRequest::SetCompression { compression } => {
                if let Some(conn) =
                    self.connections.get(id).map(|entry| Arc::clone(entry.value()))
                {
                    conn.set_metadata_field("compression", Value::String(
                        compression.as_str().to_string(),
                    ));
                    Ok(None)
                } else {
                    Err(StreamError::ConnectionNotFound(id.to_string()))
                }
            }
            ClientRequest::SetPriority { priority } => {
                if let Some(conn) =
                    self.connections.get(id).map(|entry| Arc::clone(entry.value()))
                {
                    conn.set_metadata_field(
                        "priority",
                        Value::String(priority.as_str().to_string()),
                    );
                    Ok(None)
                } else {
                    Err(StreamError::ConnectionNotFound(id.to_string()))
                }
            }
            ClientRequest::StartRecording {
                session_id,
                metadata,
            } => {
                match self.recorder.start_recording(&session_id, metadata) {
                    Ok(path) => {
                        self.send_to_client(
                            id,
                            protocol::recording_started(
                                &session_id,
                                &path.display().to_string(),
                            ),
                            MessagePriority::Normal,
                            CompressionKind::None,
                        );
                        Ok(None)
                    }
                    Err(e) => {
                        self.send_to_client(
                            id,
                            protocol::error(&e.to_string()),
                            MessagePriority::Normal,
                            CompressionKind::None,
                        );
                        Err(e)
                    }
                }
            }
            ClientRequest::StopRecording { session_id } => {
                match self.recorder.stop_recording(&session_id) {
                    Some(stats) => {
                        self.send_to_client(
                            id,
                            protocol::recording_stopped(&session_id, &stats),
                            MessagePriority::Normal,
                            CompressionKind::None,
                        );
                        Ok(None)
                    }
                    None => {
                        let e = StreamError::RecordingFailed(format!(
                            "no active session: {}",
                            session_id
                        ));
                        self.send_to_client(
                            id,
                            protocol::error(&e.to_string()),
                            MessagePriority::Normal,
                            CompressionKind::None,
                        );
                        Err(e)
                    }
                }
            }
            // Equipment and acquisition streams are driven by external
            // collaborators; hand the validated request back to the caller.
            other => Ok(Some(other)),
        }
    }

    /// Open a recording session (delegates to the recorder)
    pub fn start_recording(
        &self,
        session_id: &str,
        metadata: Map<String, Value>,
    ) -> Result<PathBuf> {
        self.recorder.start_recording(session_id, metadata)
    }

    pub fn stop_recording(&self, session_id: &str) -> Option<RecordingStats> {
        self.recorder.stop_recording(session_id)
    }

    pub fn get_recording_stats(&self, session_id: &str) -> Option<RecordingStats> {
        self.recorder.get_recording_stats(session_id)
    }

    pub fn get_active_recordings(&self) -> Vec<String> {
        self.recorder.get_active_recordings()
    }

    pub fn get_backpressure_stats(&self, id: &str) -> Option<BackpressureStats> {
        self.connections
            .get(id)
            .map(|entry| entry.value().backpressure().stats())
    }

    pub fn get_connection_info(&self, id: &str) -> Option<ConnectionInfo> {
        self.connections.get(id).map(|entry| entry.value().info())
    }

    pub fn get_all_connections(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn get_global_stats(&self) -> GlobalStats {
        GlobalStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.connections.len(),
            total_messages_sent: self.stats.total_messages_sent.load(Ordering::Relaxed),
            total_bytes_sent: self.stats.total_bytes_sent.load(Ordering::Relaxed),
            average_compression_ratio: self.stats.average_ratio(),
            active_recordings: self.recorder.get_active_recordings().len(),
        }
    }

    /// Cancel all send loops, close all transports, and stop all recordings
    pub async fn shutdown(&self) {
        info!("Shutting down stream manager");

        let ids: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::new();
        let mut tasks = Vec::new();
        for id in ids {
            if let Some((_, conn)) = self.connections.remove(&id) {
                conn.set_state(ConnectionState::Closing);
                conn.cancel_token().cancel();
                if let Some(task) = conn.take_send_task() {
                    tasks.push(task);
                }
                removed.push(conn);
            }
        }

        join_all(tasks).await;

        for conn in removed {
            if let Err(e) = conn.transport().close().await {
                debug!("Error closing transport for {}: {}", conn.id, e);
            }
            conn.set_state(ConnectionState::Closed);
        }

        let stopped = self.recorder.stop_all();
        if !stopped.is_empty() {
            info!("Stopped {} recording sessions on shutdown", stopped.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::recorder::{RecordingConfig, RecordingFormat};
    use crate::streaming::rate_limiter::RateLimitConfig;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    #[derive(Default)]
    struct MockTransport {
        json_frames: Mutex<Vec<Value>>,
        binary_frames: Mutex<Vec<Bytes>>,
        closed: AtomicBool,
        fail_sends: AtomicBool,
    }

    impl MockTransport {
        fn failing() -> Self {
            let transport = Self::default();
            transport.fail_sends.store(true, Ordering::Relaxed);
            transport
        }

        fn json_frames(&self) -> Vec<Value> {
            self.json_frames.lock().clone()
        }

        fn binary_frames(&self) -> Vec<Bytes> {
            self.binary_frames.lock().clone()
        }

        fn frame_types(&self) -> Vec<String> {
            self.json_frames()
                .iter()
                .filter_map(|v| v.get("type").and_then(Value::as_str).map(String::from))
                .collect()
        }
    }

    #[async_trait]
    impl StreamTransport for MockTransport {
        async fn handshake(&self) -> crate::utils::errors::Result<()> {
            Ok(())
        }

        async fn send_json(&self, payload: &Value) -> crate::utils::errors::Result<()> {
            if self.fail_sends.load(Ordering::Relaxed) {
                return Err(StreamError::TransportFailed("mock failure".to_string()));
            }
            self.json_frames.lock().push(payload.clone());
            Ok(())
        }

        async fn send_binary(&self, frame: Bytes) -> crate::utils::errors::Result<()> {
            if self.fail_sends.load(Ordering::Relaxed) {
                return Err(StreamError::TransportFailed("mock failure".to_string()));
            }
            self.binary_frames.lock().push(frame);
            Ok(())
        }

        async fn close(&self) -> crate::utils::errors::Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn test_config(dir: &std::path::Path) -> StreamConfig {
        StreamConfig {
            rate_limit: RateLimitConfig {
                enabled: false,
                ..Default::default()
            },
            recording: RecordingConfig {
                output_dir: dir.to_path_buf(),
                format: RecordingFormat::Jsonl,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_connect_sends_capabilities() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let transport = Arc::new(MockTransport::default());

        manager
            .connect("c1", Arc::clone(&transport) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();
        settle().await;

        assert_eq!(transport.frame_types(), vec!["capabilities"]);
        let features = transport.json_frames()[0]["features"].clone();
        assert_eq!(features["compression"], json!(["none", "gzip", "zlib"]));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_to_client_delivers_in_order() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let transport = Arc::new(MockTransport::default());

        manager
            .connect("c1", Arc::clone(&transport) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();

        let payload = protocol::stream_data("scope-1", "waveform", json!([1, 2, 3]));
        assert!(manager.send_to_client(
            "c1",
            payload,
            MessagePriority::Normal,
            CompressionKind::None
        ));
        settle().await;

        let types = transport.frame_types();
        assert_eq!(types, vec!["capabilities", "stream_data"]);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_returns_false() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));

        assert!(!manager.send_to_client(
            "ghost",
            protocol::pong(),
            MessagePriority::Normal,
            CompressionKind::None
        ));
    }

    #[tokio::test]
    async fn test_compressed_delivery_uses_binary_frames() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let transport = Arc::new(MockTransport::default());

        manager
            .connect("c1", Arc::clone(&transport) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();

        let payload = protocol::stream_data("scope-1", "waveform", json!({"v": "x"}));
        assert!(manager.send_to_client(
            "c1",
            payload.clone(),
            MessagePriority::Normal,
            CompressionKind::Gzip
        ));
        settle().await;

        let frames = transport.binary_frames();
        assert_eq!(frames.len(), 1);

        let (kind, compressed) = Compressor::decode_frame(&frames[0]).unwrap();
        assert_eq!(kind, CompressionKind::Gzip);

        let text = Compressor::default().decompress(compressed, kind).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["equipment_id"], json!("scope-1"));

        let stats = manager.get_global_stats();
        assert!(stats.average_compression_ratio > 0.0);
        assert!(stats.total_bytes_sent > 0);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_excludes() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let t1 = Arc::new(MockTransport::default());
        let t2 = Arc::new(MockTransport::default());

        manager
            .connect("c1", Arc::clone(&t1) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();
        manager
            .connect("c2", Arc::clone(&t2) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();

        let delivered = manager.broadcast(
            protocol::stream_data("psu-1", "telemetry", json!(12.0)),
            MessagePriority::Normal,
            CompressionKind::None,
            &["c2"],
        );
        assert_eq!(delivered, 1);
        settle().await;

        assert!(t1.frame_types().contains(&"stream_data".to_string()));
        assert!(!t2.frame_types().contains(&"stream_data".to_string()));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let transport = Arc::new(MockTransport::default());

        manager
            .connect("c1", Arc::clone(&transport) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();

        manager.disconnect("c1").await;
        assert!(transport.closed.load(Ordering::Relaxed));
        assert!(manager.get_all_connections().is_empty());

        // Second disconnect of the same id is a no-op
        manager.disconnect("c1").await;
        manager.disconnect("never-existed").await;
    }

    #[tokio::test]
    async fn test_transmit_failure_disconnects_only_that_connection() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let healthy = Arc::new(MockTransport::default());
        let broken = Arc::new(MockTransport::failing());

        manager
            .connect("good", Arc::clone(&healthy) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();
        manager
            .connect("bad", Arc::clone(&broken) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();
        settle().await;

        // The capabilities transmit already failed and removed "bad"
        assert_eq!(manager.get_all_connections(), vec!["good".to_string()]);
        assert!(broken.closed.load(Ordering::Relaxed));

        // The healthy connection keeps delivering
        assert!(manager.send_to_client(
            "good",
            protocol::pong(),
            MessagePriority::Normal,
            CompressionKind::None
        ));
        settle().await;
        assert!(healthy.frame_types().contains(&"pong".to_string()));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_handle_ping_and_stats() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let transport = Arc::new(MockTransport::default());

        manager
            .connect("c1", Arc::clone(&transport) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();

        assert!(manager
            .handle_client_message("c1", r#"{"type": "ping"}"#)
            .unwrap()
            .is_none());
        assert!(manager
            .handle_client_message("c1", r#"{"type": "get_stats"}"#)
            .unwrap()
            .is_none());
        settle().await;

        let types = transport.frame_types();
        assert!(types.contains(&"pong".to_string()));
        assert!(types.contains(&"stats".to_string()));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_compression_changes_connection_default() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let transport = Arc::new(MockTransport::default());

        manager
            .connect("c1", Arc::clone(&transport) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();
        settle().await;

        manager
            .handle_client_message("c1", r#"{"type": "set_compression", "compression": "zlib"}"#)
            .unwrap();

        // Caller passes None: the connection default now applies
        manager.send_to_client(
            "c1",
            protocol::pong(),
            MessagePriority::Normal,
            CompressionKind::None,
        );
        settle().await;

        let frames = transport.binary_frames();
        assert_eq!(frames.len(), 1);
        let (kind, _) = Compressor::decode_frame(&frames[0]).unwrap();
        assert_eq!(kind, CompressionKind::Zlib);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_control_message_sends_error() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let transport = Arc::new(MockTransport::default());

        manager
            .connect("c1", Arc::clone(&transport) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();

        let result = manager.handle_client_message("c1", r#"{"type": "warp_core_eject"}"#);
        assert!(result.is_err());
        settle().await;

        assert!(transport.frame_types().contains(&"error".to_string()));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_stream_requests_are_returned_to_caller() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));

        let forwarded = manager
            .handle_client_message(
                "c1",
                r#"{"type": "start_stream", "equipment_id": "scope-1", "stream_type": "waveform"}"#,
            )
            .unwrap();

        match forwarded {
            Some(ClientRequest::StartStream { equipment_id, .. }) => {
                assert_eq!(equipment_id, "scope-1");
            }
            other => panic!("unexpected dispatch result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recording_captures_delivered_messages() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let transport = Arc::new(MockTransport::default());

        manager
            .connect("c1", Arc::clone(&transport) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();
        settle().await;

        manager.start_recording("session_1", Map::new()).unwrap();
        manager.send_to_client(
            "c1",
            protocol::stream_data("scope-1", "waveform", json!([9])),
            MessagePriority::Normal,
            CompressionKind::None,
        );
        settle().await;

        let stats = manager.stop_recording("session_1").unwrap();
        assert_eq!(stats.message_count, 1);

        manager.shutdown().await;
    }

    /// Transport whose sends block until permits are released, letting a
    /// test fill the queue while the send loop is mid-transmit
    struct GatedTransport {
        inner: MockTransport,
        gate: tokio::sync::Semaphore,
    }

    impl Default for GatedTransport {
        fn default() -> Self {
            Self {
                inner: MockTransport::default(),
                gate: tokio::sync::Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl StreamTransport for GatedTransport {
        async fn handshake(&self) -> crate::utils::errors::Result<()> {
            Ok(())
        }

        async fn send_json(&self, payload: &Value) -> crate::utils::errors::Result<()> {
            let permit = self.gate.acquire().await.map_err(|_| {
                StreamError::TransportFailed("gate closed".to_string())
            })?;
            permit.forget();
            self.inner.send_json(payload).await
        }

        async fn send_binary(&self, frame: Bytes) -> crate::utils::errors::Result<()> {
            self.inner.send_binary(frame).await
        }

        async fn close(&self) -> crate::utils::errors::Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_critical_overtakes_low_in_delivery_order() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let transport = Arc::new(GatedTransport::default());

        manager
            .connect("c1", Arc::clone(&transport) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();
        settle().await;

        // The send loop is parked inside the capabilities transmit; both
        // messages land in the queue before anything else is drained
        manager.send_to_client(
            "c1",
            protocol::stream_data("scope-1", "bulk", json!(1)),
            MessagePriority::Low,
            CompressionKind::None,
        );
        manager.send_to_client(
            "c1",
            protocol::error("overtemperature alarm"),
            MessagePriority::Critical,
            CompressionKind::None,
        );

        transport.gate.add_permits(3);
        settle().await;

        let types = transport.inner.frame_types();
        assert_eq!(types, vec!["capabilities", "error", "stream_data"]);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_global_stats_and_connection_info() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let transport = Arc::new(MockTransport::default());

        let mut metadata = Map::new();
        metadata.insert("client".to_string(), json!("gui"));
        manager
            .connect("c1", Arc::clone(&transport) as Arc<dyn StreamTransport>, metadata)
            .await
            .unwrap();
        settle().await;

        let global = manager.get_global_stats();
        assert_eq!(global.total_connections, 1);
        assert_eq!(global.active_connections, 1);
        assert!(global.total_messages_sent >= 1);

        let info = manager.get_connection_info("c1").unwrap();
        assert_eq!(info.state, ConnectionState::Open);
        assert_eq!(info.metadata.get("client"), Some(&json!("gui")));

        let bp = manager.get_backpressure_stats("c1").unwrap();
        assert!(bp.messages_sent >= 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(test_config(dir.path()));
        let t1 = Arc::new(MockTransport::default());
        let t2 = Arc::new(MockTransport::default());

        manager
            .connect("c1", Arc::clone(&t1) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();
        manager
            .connect("c2", Arc::clone(&t2) as Arc<dyn StreamTransport>, Map::new())
            .await
            .unwrap();
        manager.start_recording("session_1", Map::new()).unwrap();

        manager.shutdown().await;

        assert!(manager.get_all_connections().is_empty());
        assert!(manager.get_active_recordings().is_empty());
        assert!(t1.closed.load(Ordering::Relaxed));
        assert!(t2.closed.load(Ordering::Relaxed));
    }
}
