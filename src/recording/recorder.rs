// src/recording/recorder.rs
//! Durable recording of the message stream
//!
//! Recording is decoupled from delivery: sessions are named, independently
//! lifecycled captures that outlive the connections feeding them. Each
//! session appends to one file in a selectable format, optionally gzipped
//! as a whole, and stops itself once it reaches the configured size limit.
//!
//! Concurrent send loops may feed the same session; a per-session lock
//! serializes writes since none of the on-disk formats tolerate interleaved
//! appends.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::streaming::message::StreamMessage;
use crate::utils::errors::{Result, StreamError};

/// On-disk recording formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    /// One JSON array, optional leading `_metadata` object
    Json,

    /// One JSON object per line
    Jsonl,

    /// `timestamp,message_type,data` header then quoted rows
    Csv,

    /// Newline-delimited raw JSON bytes
    Binary,
}

impl RecordingFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RecordingFormat::Json => "json",
            RecordingFormat::Jsonl => "jsonl",
            RecordingFormat::Csv => "csv",
            RecordingFormat::Binary => "bin",
        }
    }
}

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Directory receiving recording files
    pub output_dir: PathBuf,

    /// On-disk format for new sessions
    pub format: RecordingFormat,

    /// Gzip the whole output file (`.gz` suffix)
    pub compress_output: bool,

    /// Inject the envelope timestamp into each record
    pub include_timestamps: bool,

    /// Stop a session once it has written this many megabytes; None means
    /// unbounded
    pub max_file_size_mb: Option<u64>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./recordings"),
            format: RecordingFormat::Jsonl,
            compress_output: false,
            include_timestamps: true,
            max_file_size_mb: Some(100),
        }
    }
}

/// Statistics for one recording session
#[derive(Debug, Clone, Serialize)]
pub struct RecordingStats {
    pub session_id: String,
    pub filepath: PathBuf,
    pub format: RecordingFormat,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub message_count: u64,
    pub bytes_written: u64,
    pub messages_per_second: f64,
}

enum RecordingWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl RecordingWriter {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            RecordingWriter::Plain(writer) => writer.write_all(buf),
            RecordingWriter::Gzip(writer) => writer.write_all(buf),
        }
    }

    fn finish(&mut self) -> std::io::Result<()> {
        match self {
            RecordingWriter::Plain(writer) => writer.flush(),
            RecordingWriter::Gzip(writer) => {
                writer.try_finish()?;
                writer.get_mut().flush()
            }
        }
    }
}

fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

struct RecordingSession {
    session_id: String,
    path: PathBuf,
    format: RecordingFormat,
    writer: RecordingWriter,
    started_at: DateTime<Utc>,
    started_instant: Instant,
    message_count: u64,
    bytes_written: u64,
    elements_written: u64,
    metadata: Map<String, Value>,
}

impl RecordingSession {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.writer.write_all(buf).map_err(|e| {
            StreamError::RecordingFailed(format!(
                "write error on {}: {}",
                self.path.display(),
                e
            ))
        })?;
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        match self.format {
            RecordingFormat::Json => {
                self.write(b"[")?;
                if !self.metadata.is_empty() {
                    let element = json!({ "_metadata": self.metadata });
                    let text = serde_json::to_string(&element).map_err(|e| {
                        StreamError::RecordingFailed(format!("metadata serialization: {}", e))
                    })?;
                    self.write(b"\n  ")?;
                    self.write(text.as_bytes())?;
                    self.elements_written += 1;
                }
            }
            RecordingFormat::Csv => {
                self.write(b"timestamp,message_type,data\n")?;
            }
            RecordingFormat::Jsonl | RecordingFormat::Binary => {}
        }
        Ok(())
    }

    fn append(&mut self, message: &StreamMessage, include_timestamps: bool) -> Result<()> {
        let mut record = message.payload.clone();
        if include_timestamps && !record.contains_key("timestamp") {
            record.insert(
                "timestamp".to_string(),
                Value::String(message.timestamp.to_rfc3339()),
            );
        }

        let text = serde_json::to_string(&record).map_err(|e| {
            StreamError::RecordingFailed(format!("record serialization: {}", e))
        })?;

        match self.format {
            RecordingFormat::Json => {
                let prefix: &[u8] = if self.elements_written == 0 {
                    b"\n  "
                } else {
                    b",\n  "
                };
                self.write(prefix)?;
                self.write(text.as_bytes())?;
                self.elements_written += 1;
            }
            RecordingFormat::Jsonl => {
                self.write(text.as_bytes())?;
                self.write(b"\n")?;
            }
            RecordingFormat::Csv => {
                let row = format!(
                    "{},{},{}\n",
                    csv_quote(&message.timestamp.to_rfc3339()),
                    csv_quote(message.message_type()),
                    csv_quote(&text)
                );
                self.write(row.as_bytes())?;
            }
            RecordingFormat::Binary => {
                self.write(text.as_bytes())?;
                self.write(b"\n")?;
            }
        }

        self.message_count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.format == RecordingFormat::Json {
            self.write(b"\n]\n")?;
        }
        self.writer.finish().map_err(|e| {
            StreamError::RecordingFailed(format!(
                "close error on {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn stats(&self) -> RecordingStats {
        let duration_secs = self.started_instant.elapsed().as_secs_f64();
        let messages_per_second = if duration_secs > 0.0 {
            self.message_count as f64 / duration_secs
        } else {
            0.0
        };

        RecordingStats {
            session_id: self.session_id.clone(),
            filepath: self.path.clone(),
            format: self.format,
            started_at: self.started_at,
            duration_secs,
            message_count: self.message_count,
            bytes_written: self.bytes_written,
            messages_per_second,
        }
    }
}

/// Stream recorder with named, independently-lifecycled sessions
pub struct StreamRecorder {
    config: RecordingConfig,
    sessions: DashMap<String, Arc<Mutex<RecordingSession>>>,
}

impl StreamRecorder {
    pub fn new(config: RecordingConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
        }
    }

    /// Open a new recording session
    ///
    /// The filename is derived from the session id, a timestamp, the format
    /// extension, and a `.gz` suffix for compressed output. Fails with
    /// [`StreamError::SessionAlreadyActive`] if the id is already recording.
    pub fn start_recording(
        &self,
        session_id: &str,
        metadata: Map<String, Value>,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir).map_err(|e| {
            StreamError::RecordingFailed(format!(
                "failed to create {}: {}",
                self.config.output_dir.display(),
                e
            ))
        })?;

        let entry = match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(StreamError::SessionAlreadyActive(session_id.to_string()));
            }
            Entry::Vacant(entry) => entry,
        };

        let started_at = Utc::now();
        let mut filename = format!(
            "{}_{}.{}",
            session_id,
            started_at.format("%Y%m%d_%H%M%S"),
            self.config.format.extension()
        );
        if self.config.compress_output {
            filename.push_str(".gz");
        }
        let path = self.config.output_dir.join(filename);

        let file = File::create(&path).map_err(|e| {
            StreamError::RecordingFailed(format!("failed to create {}: {}", path.display(), e))
        })?;
        let writer = if self.config.compress_output {
            RecordingWriter::Gzip(GzEncoder::new(BufWriter::new(file), Compression::default()))
        } else {
            RecordingWriter::Plain(BufWriter::new(file))
        };

        let mut session = RecordingSession {
            session_id: session_id.to_string(),
            path: path.clone(),
            format: self.config.format,
            writer,
            started_at,
            started_instant: Instant::now(),
            message_count: 0,
            bytes_written: 0,
            elements_written: 0,
            metadata,
        };
        session.write_header()?;

        info!(
            "Recording session {} started: {}",
            session_id,
            path.display()
        );
        entry.insert(Arc::new(Mutex::new(session)));

        Ok(path)
    }

    /// Append one message to a session
    ///
    /// Once the session reaches `max_file_size_mb` it is stopped
    /// automatically (the crossing write is kept); callers must check
    /// whether the session is still active afterwards.
    pub fn record_message(&self, session_id: &str, message: &StreamMessage) -> Result<()> {
        let session_arc = self
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                StreamError::RecordingFailed(format!("no active session: {}", session_id))
            })?;

        let over_limit = {
            let mut session = session_arc.lock();
            session.append(message, self.config.include_timestamps)?;

            match self.config.max_file_size_mb {
                Some(limit_mb) => session.bytes_written >= limit_mb * 1024 * 1024,
                None => false,
            }
        };

        if over_limit {
            info!(
                "Recording session {} reached its size limit, stopping",
                session_id
            );
            self.stop_recording(session_id);
        }

        Ok(())
    }

    /// Record a message to every active session
    ///
    /// Used by send loops after a successful transmit; per-session failures
    /// are logged and never affect delivery.
    pub fn record_to_all(&self, message: &StreamMessage) {
        if self.sessions.is_empty() {
            return;
        }

        for session_id in self.get_active_recordings() {
            if let Err(e) = self.record_message(&session_id, message) {
                warn!("Failed to record message to session {}: {}", session_id, e);
            }
        }
    }

    /// Close a session: write the format footer, flush, and report stats
    ///
    /// Returns None for unknown session ids.
    pub fn stop_recording(&self, session_id: &str) -> Option<RecordingStats> {
        let (_, session_arc) = self.sessions.remove(session_id)?;
        let mut session = session_arc.lock();

        if let Err(e) = session.finish() {
            warn!("Error finalizing recording session {}: {}", session_id, e);
        }

        let stats = session.stats();
        info!(
            "Recording session {} stopped: {} messages, {} bytes",
            session_id, stats.message_count, stats.bytes_written
        );

        Some(stats)
    }

    /// Stop every active session, returning their final stats
    pub fn stop_all(&self) -> Vec<RecordingStats> {
        self.get_active_recordings()
            .into_iter()
            .filter_map(|session_id| self.stop_recording(&session_id))
            .collect()
    }

    /// Ids of all currently recording sessions
    pub fn get_active_recordings(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Point-in-time stats for an active session
    pub fn get_recording_stats(&self, session_id: &str) -> Option<RecordingStats> {
        let session_arc = self
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))?;
        let session = session_arc.lock();
        Some(session.stats())
    }

    pub fn has_active_recordings(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }
}
