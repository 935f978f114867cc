//! Compression for disk payloads.
//!
//! Encoded records above a size threshold are wrapped in a zstd frame when
//! compression is enabled. Reads detect the zstd frame magic, so files written
//! with compression on and off can share one directory.

use crate::config::CompressionConfig;
use thiserror::Error;

/// First four bytes of every zstd frame.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Zstd compression failed: {0}")]
    ZstdError(#[from] std::io::Error),
}

/// Result of compressing one payload.
#[derive(Debug)]
pub struct Compressed {
    pub data: Vec<u8>,
    /// Bytes saved relative to the uncompressed payload.
    pub saved: u64,
}

/// The compression engine for disk writes and reads.
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Compress `data` if enabled, large enough, and actually smaller afterwards.
    pub fn compress(&self, data: Vec<u8>) -> Result<Compressed, CompressionError> {
        if !self.config.enabled || data.len() < self.config.min_size_bytes {
            return Ok(Compressed { data, saved: 0 });
        }

        let compressed = self.zstd_compress(&data)?;
        if compressed.len() >= data.len() {
            return Ok(Compressed { data, saved: 0 });
        }

        let saved = (data.len() - compressed.len()) as u64;
        Ok(Compressed {
            data: compressed,
            saved,
        })
    }

    /// Undo [`compress`](Self::compress); plain payloads pass through.
    pub fn decompress(&self, data: Vec<u8>) -> Result<Vec<u8>, CompressionError> {
        if is_zstd_frame(&data) {
            self.zstd_decompress(&data)
        } else {
            Ok(data)
        }
    }

    /// Compress data with zstd.
    fn zstd_compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let compressed = zstd::encode_all(data, self.config.level)?;
        Ok(compressed)
    }

    /// Decompress zstd data.
    fn zstd_decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let decompressed = zstd::decode_all(data)?;
        Ok(decompressed)
    }
}

fn is_zstd_frame(data: &[u8]) -> bool {
    data.len() >= ZSTD_MAGIC.len() && data[..ZSTD_MAGIC.len()] == ZSTD_MAGIC
}
