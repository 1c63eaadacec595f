// src/utils/errors.rs
//! Error types for the streaming core
//!
//! All fallible operations in the crate return [`Result`]. Failures are
//! scoped: transport errors are fatal to one connection, recording errors to
//! one session, codec errors to one message. Nothing here aborts the process.

use thiserror::Error;

/// Streaming core errors
#[derive(Error, Debug)]
pub enum StreamError {
    /// Message compression or decompression failed
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// Sending on a connection's transport failed
    #[error("transport failed: {0}")]
    TransportFailed(String),

    /// No connection registered under the given id
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// A recording session write or lifecycle operation failed
    #[error("recording failed: {0}")]
    RecordingFailed(String),

    /// `start_recording` called for a session id that is already open
    #[error("recording session already active: {0}")]
    SessionAlreadyActive(String),

    /// A control message could not be parsed or carried an unknown value
    #[error("invalid client request: {0}")]
    InvalidRequest(String),

    /// Configuration loading or validation failed
    #[error("configuration failed: {0}")]
    ConfigFailed(String),

    /// Payload serialization failed
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, StreamError>;
