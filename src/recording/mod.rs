// src/recording/mod.rs
//! Stream recording and durable capture
//!
//! Named recording sessions capture the delivered message stream to disk,
//! decoupled from any single connection:
//!
//! - **Recorder**: session lifecycle, format serialization, size-bounded
//!   auto-stop, optional whole-file gzip

pub mod recorder;

// Re-export commonly used types
pub use recorder::{RecordingConfig, RecordingFormat, RecordingStats, StreamRecorder};
