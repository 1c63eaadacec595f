// src/lib.rs
//! LabLink Streaming Core
//!
//! Real-time streaming transport layer for the LabLink lab-equipment
//! remote-control platform: pushes telemetry, waveform, and acquisition
//! updates from the server to many concurrently connected clients over
//! persistent bidirectional channels, under load, without unbounded memory
//! growth or head-of-line blocking.
//!
//! # Architecture
//!
//! The crate is structured into three areas:
//!
//! - **streaming**: message envelopes, per-connection backpressure
//!   (priority queue + token-bucket rate limiting), compression, the
//!   transport seam, the control protocol, and the [`StreamManager`]
//!   orchestrator with one send loop per connection
//! - **recording**: named, independently-lifecycled capture of the
//!   delivered stream to disk in JSON/JSONL/CSV/binary formats
//! - **observability** / **utils**: tracing setup, configuration loading,
//!   and the crate-wide error type
//!
//! Equipment drivers, the HTTP API, authentication, and the GUI client are
//! external collaborators: producers hand this crate already-built payloads
//! and a destination, and the core gets them out reliably.
//!
//! # Example
//!
//! ```rust,ignore
//! use lablink_stream::{StreamConfig, StreamManager, MessagePriority, CompressionKind};
//!
//! let manager = StreamManager::new(StreamConfig::load()?);
//! manager.connect("gui-1", transport, metadata).await?;
//! manager.broadcast(payload, MessagePriority::Critical, CompressionKind::None, &[]);
//! manager.shutdown().await;
//! ```

// Public module exports
pub mod observability;
pub mod recording;
pub mod streaming;
pub mod utils;

// Re-export commonly used types
pub use recording::recorder::{RecordingConfig, RecordingFormat, RecordingStats, StreamRecorder};
pub use streaming::backpressure::{BackpressureConfig, BackpressureHandler, BackpressureStats};
pub use streaming::connection::{ConnectionInfo, ConnectionState, StreamTransport};
pub use streaming::manager::{GlobalStats, StreamManager};
pub use streaming::message::{CompressionKind, MessagePriority, StreamMessage};
pub use streaming::protocol::ClientRequest;
pub use utils::config::StreamConfig;
pub use utils::errors::{Result, StreamError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
