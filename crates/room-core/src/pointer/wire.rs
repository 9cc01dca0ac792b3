//! Pointer payload wire format
//!
//! A pointer update travels as one JSON object per data-track message:
//!
//! ```text
//! {"v":1,"pressed":true,"x":10.0,"y":20.0,"seq":42}
//! ```
//!
//! `v` defaults to 1 when absent and `seq` is optional, so the minimal
//! `{"pressed":true,"x":1,"y":2}` is accepted. Unknown fields are ignored to
//! leave room for additive changes within a version.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest wire version this build understands
pub const WIRE_VERSION: u8 = 1;

/// Payloads larger than this are rejected without parsing
pub const MAX_PAYLOAD_BYTES: usize = 1024;

/// Why a pointer payload was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolDecodeError {
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_BYTES} byte limit")]
    TooLarge(usize),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    #[error("coordinates must be finite")]
    NonFinite,
}

fn default_version() -> u8 {
    WIRE_VERSION
}

/// One pointer update as carried on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerPayload {
    #[serde(rename = "v", default = "default_version")]
    pub version: u8,
    pub pressed: bool,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl PointerPayload {
    pub fn new(pressed: bool, x: f64, y: f64) -> Self {
        Self {
            version: WIRE_VERSION,
            pressed,
            x,
            y,
            seq: None,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Serialize; refuses values the decoder would reject
    pub fn encode(&self) -> Result<Bytes, ProtocolDecodeError> {
        self.validate()?;
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| ProtocolDecodeError::Malformed(e.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolDecodeError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(ProtocolDecodeError::TooLarge(payload.len()));
        }

        let decoded: PointerPayload = serde_json::from_slice(payload)
            .map_err(|e| ProtocolDecodeError::Malformed(e.to_string()))?;
        decoded.validate()?;
        Ok(decoded)
    }

    fn validate(&self) -> Result<(), ProtocolDecodeError> {
        if self.version > WIRE_VERSION || self.version == 0 {
            return Err(ProtocolDecodeError::UnsupportedVersion(self.version));
        }
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(ProtocolDecodeError::NonFinite);
        }
        Ok(())
    }
}
