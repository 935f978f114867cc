//! Value encoding for tiers that store bytes.
//!
//! The disk and remote tiers turn a [`Record`](crate::cache::entry::Record)
//! into bytes through a [`Codec`]. JSON is the default; callers with values
//! that do not round-trip through JSON text can plug in their own codec.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Custom(String),
}

/// Encode/decode pair used for persisted and remote payloads.
pub trait Codec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Plain JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
