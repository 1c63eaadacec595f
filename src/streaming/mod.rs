// src/streaming/mod.rs
//! Real-time streaming transport
//!
//! This module pushes telemetry, waveform, and acquisition updates from the
//! server to many concurrently connected clients without unbounded memory
//! growth or head-of-line blocking:
//!
//! - **Message**: typed envelope (priority, compression, timestamp, payload)
//! - **Compressor**: per-message gzip/zlib codec and binary wire framing
//! - **Priority Queue**: bounded four-level queue with strict drain order
//! - **Rate Limiter**: token-bucket send admission per connection
//! - **Backpressure**: queue + limiter composed into one admission decision
//! - **Connection**: transport seam and per-connection state
//! - **Protocol**: validated control messages and server payload builders
//! - **Manager**: connection registry, send loops, broadcast, recording tie-in
//!
//! # Architecture
//!
//! ```text
//! Producer ──send_to_client/broadcast──► StreamManager
//!                                            │
//!                              ┌─────────────┼─────────────┐
//!                        BackpressureHandler (one per connection)
//!                              │ PriorityQueue + RateLimiter
//!                              ▼
//!                         Send Loop (task per connection)
//!                              │ compress? frame? transmit
//!                              ▼
//!                        StreamTransport ──► client
//!                              │
//!                              └──► StreamRecorder (active sessions)
//! ```

pub mod backpressure;
pub mod compressor;
pub mod connection;
pub mod manager;
pub mod message;
pub mod priority_queue;
pub mod protocol;
pub mod rate_limiter;

// Re-export commonly used types
pub use backpressure::{BackpressureConfig, BackpressureHandler, BackpressureStats};
pub use compressor::Compressor;
pub use connection::{ClientConnection, ConnectionInfo, ConnectionState, StreamTransport};
pub use manager::{GlobalStats, StreamManager};
pub use message::{CompressionKind, MessagePriority, StreamMessage};
pub use priority_queue::{PriorityDepths, PriorityQueue};
pub use protocol::ClientRequest;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
