//! Compression Codec Module
//!
//! Gzip compression of oversized JSON payloads, stored as a JSON envelope
//! `{"compressed":true,"data":<base64>,"originalSize":n,"compressedSize":m}`.
//!
//! A stored value is only treated as an envelope when it has exactly those
//! four fields with `compressed` set to `true`. Anything else, including user
//! JSON that happens to start with `{"compressed":true`, passes through as is.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Every serialized envelope starts with these bytes (`compressed` is the first field).
const ENVELOPE_MARKER: &[u8] = br#"{"compressed":true"#;

// == Envelope ==
/// Stored form of a compressed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompressedEnvelope {
    pub compressed: bool,
    /// Base64 of the gzip stream
    pub data: String,
    pub original_size: usize,
    pub compressed_size: usize,
}

/// Bytes ready for the store plus what happened to them.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub compressed: bool,
    pub original_size: usize,
}

// == Codec ==
/// Reversible size reduction for payloads at or above a byte threshold.
#[derive(Debug, Clone)]
pub struct CompressionCodec {
    enabled: bool,
    level: u32,
}

impl CompressionCodec {
    pub fn new(enabled: bool, level: u32) -> Self {
        Self {
            enabled,
            level: level.min(9),
        }
    }

    /// Gzip `raw`.
    pub fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(raw)
            .and_then(|_| encoder.finish())
            .map_err(|e| CacheError::Serialization(format!("gzip failed: {}", e)))
    }

    /// Gunzip `data`.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CacheError::Serialization(format!("gunzip failed: {}", e)))?;
        Ok(out)
    }

    /// Wraps `json` in a compressed envelope when enabled and
    /// `json.len() >= threshold`; otherwise passes it through.
    pub fn encode(&self, json: Vec<u8>, threshold: usize) -> Result<EncodedPayload> {
        let original_size = json.len();
        if !self.enabled || original_size < threshold {
            return Ok(EncodedPayload {
                bytes: json,
                compressed: false,
                original_size,
            });
        }

        let gz = self.compress(&json)?;
        let envelope = CompressedEnvelope {
            compressed: true,
            compressed_size: gz.len(),
            data: STANDARD.encode(&gz),
            original_size,
        };

        Ok(EncodedPayload {
            bytes: serde_json::to_vec(&envelope)?,
            compressed: true,
            original_size,
        })
    }

    /// Returns the JSON bytes behind a stored value, expanding envelopes.
    ///
    /// Envelopes are recognised whether or not compression is currently
    /// enabled, so entries written under another setting stay readable.
    pub fn decode(&self, stored: Vec<u8>) -> Result<Vec<u8>> {
        let Some(envelope) = Self::parse_envelope(&stored) else {
            return Ok(stored);
        };

        let gz = STANDARD
            .decode(envelope.data.as_bytes())
            .map_err(|e| CacheError::Serialization(format!("bad envelope data: {}", e)))?;
        if gz.len() != envelope.compressed_size {
            return Err(CacheError::Serialization(format!(
                "envelope holds {} compressed bytes, expected {}",
                gz.len(),
                envelope.compressed_size
            )));
        }
        let json = self.decompress(&gz)?;

        if json.len() != envelope.original_size {
            return Err(CacheError::Serialization(format!(
                "envelope expanded to {} bytes, expected {}",
                json.len(),
                envelope.original_size
            )));
        }
        Ok(json)
    }

    /// True when `stored` is a compression envelope.
    pub fn is_envelope(stored: &[u8]) -> bool {
        Self::parse_envelope(stored).is_some()
    }

    fn parse_envelope(stored: &[u8]) -> Option<CompressedEnvelope> {
        if !stored.starts_with(ENVELOPE_MARKER) {
            return None;
        }
        serde_json::from_slice::<CompressedEnvelope>(stored)
            .ok()
            .filter(|envelope| envelope.compressed)
    }
}
