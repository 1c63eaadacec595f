// src/streaming/compressor.rs
//! Per-message compression and binary wire framing
//!
//! Converts serialized payload text to compressed bytes and back for a
//! selectable [`CompressionKind`]. Compressed messages travel as binary
//! frames: one prefix byte encoding the kind, followed by the compressed
//! payload. Uncompressed messages bypass this module and are sent as plain
//! structured frames.

use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::{Read, Write};
use tracing::trace;

use crate::streaming::message::CompressionKind;
use crate::utils::errors::{Result, StreamError};

/// Stateless message codec
pub struct Compressor {
    level: Compression,
}

impl Compressor {
    /// Create a compressor with an explicit flate2 level (0-9)
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }

    /// Compress payload text for the given kind
    ///
    /// `CompressionKind::None` is the identity transform (UTF-8 encode only).
    pub fn compress(&self, text: &str, kind: CompressionKind) -> Result<Vec<u8>> {
        let compressed = match kind {
            CompressionKind::None => text.as_bytes().to_vec(),
            CompressionKind::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), self.level);
                encoder.write_all(text.as_bytes()).map_err(|e| {
                    StreamError::CompressionFailed(format!("gzip encode error: {}", e))
                })?;
                encoder.finish().map_err(|e| {
                    StreamError::CompressionFailed(format!("gzip finish error: {}", e))
                })?
            }
            CompressionKind::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
                encoder.write_all(text.as_bytes()).map_err(|e| {
                    StreamError::CompressionFailed(format!("zlib encode error: {}", e))
                })?;
                encoder.finish().map_err(|e| {
                    StreamError::CompressionFailed(format!("zlib finish error: {}", e))
                })?
            }
        };

        trace!(
            "Compressed {} bytes -> {} bytes ({})",
            text.len(),
            compressed.len(),
            kind.as_str()
        );

        Ok(compressed)
    }

    /// Decompress bytes produced by [`compress`](Self::compress)
    ///
    /// Malformed input is fatal for the message being processed and surfaces
    /// as [`StreamError::CompressionFailed`].
    pub fn decompress(&self, data: &[u8], kind: CompressionKind) -> Result<String> {
        match kind {
            CompressionKind::None => String::from_utf8(data.to_vec()).map_err(|e| {
                StreamError::CompressionFailed(format!("invalid UTF-8 payload: {}", e))
            }),
            CompressionKind::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut text = String::new();
                decoder.read_to_string(&mut text).map_err(|e| {
                    StreamError::CompressionFailed(format!("gzip decode error: {}", e))
                })?;
                Ok(text)
            }
            CompressionKind::Zlib => {
                let mut decoder = ZlibDecoder::new(data);
                let mut text = String::new();
                decoder.read_to_string(&mut text).map_err(|e| {
                    StreamError::CompressionFailed(format!("zlib decode error: {}", e))
                })?;
                Ok(text)
            }
        }
    }

    /// Ratio of original to compressed byte length
    ///
    /// Defined as `1.0` for empty compressed output.
    pub fn compression_ratio(original: &str, compressed: &[u8]) -> f64 {
        if compressed.is_empty() {
            return 1.0;
        }
        original.len() as f64 / compressed.len() as f64
    }

    /// Build a binary wire frame: 1 kind byte + compressed payload
    pub fn encode_frame(kind: CompressionKind, compressed: Vec<u8>) -> Bytes {
        let mut frame = Vec::with_capacity(compressed.len() + 1);
        frame.push(kind.as_byte());
        frame.extend_from_slice(&compressed);
        Bytes::from(frame)
    }

    /// Split a binary wire frame into its kind and compressed payload
    pub fn decode_frame(frame: &[u8]) -> Result<(CompressionKind, &[u8])> {
        let (prefix, payload) = frame.split_first().ok_or_else(|| {
            StreamError::CompressionFailed("empty binary frame".to_string())
        })?;
        Ok((CompressionKind::from_byte(*prefix)?, payload))
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}
