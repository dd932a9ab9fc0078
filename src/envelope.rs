//! Sample encoding.
//!
//! A sample travels as a double-encoded JSON envelope:
//!
//! ```text
//! {"level":0.87,"timestamp":"2024-05-01T12:30:45Z"}   inner JSON
//!        -> base64 (standard alphabet, padded)
//! {"data":"eyJsZXZlbCI6MC44NywidGltZXN0YW1wIjoi..."}  outer JSON = payload
//! ```

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sample::Sample;

/// Failure to serialize a sample. Re-encoding the same sample fails the same
/// way, so callers drop the sample instead of retrying.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize sample: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to read a sample back out of an envelope payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid envelope json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 in envelope: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Transport-ready representation of one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEnvelope {
    payload: Vec<u8>,
}

impl EncodedEnvelope {
    /// Payload bytes, sent verbatim as the request body.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.payload
    }
}

/// Inner wire form of a sample.
#[derive(Debug, Serialize, Deserialize)]
struct WireSample {
    level: f64,
    #[serde(with = "iso8601_seconds")]
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Outer single-field wrapper.
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    data: String,
}

/// Encode `sample` into its envelope.
///
/// # Errors
/// Returns [`EncodeError`] if either JSON stage fails to serialize.
pub fn encode(sample: &Sample) -> Result<EncodedEnvelope, EncodeError> {
    let inner = serde_json::to_vec(&WireSample {
        level: sample.value(),
        timestamp: sample.captured_at(),
    })?;

    let outer = WireEnvelope {
        data: general_purpose::STANDARD.encode(inner),
    };

    Ok(EncodedEnvelope {
        payload: serde_json::to_vec(&outer)?,
    })
}

/// Decode an envelope payload back into a sample.
///
/// # Errors
/// Returns [`DecodeError`] if the outer JSON, the base64 text or the inner
/// JSON is malformed.
pub fn decode(payload: &[u8]) -> Result<Sample, DecodeError> {
    let outer: WireEnvelope = serde_json::from_slice(payload)?;
    let inner = general_purpose::STANDARD.decode(outer.data)?;
    let wire: WireSample = serde_json::from_slice(&inner)?;
    Ok(Sample::new(wire.level, wire.timestamp))
}

/// `YYYY-MM-DDTHH:MM:SSZ` timestamps.
mod iso8601_seconds {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
