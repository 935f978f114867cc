//! Storage tiers.
//!
//! - [`memory`]: bounded in-process map (L1)
//! - [`disk`]: one file per key under a root directory (L2)
//! - [`remote`]: adapter over an external key/value service (L3)
//!
//! All tiers implement the async [`Tier`] trait so the coordinator drives
//! them through a single code path; the memory tier simply resolves
//! immediately.

pub mod disk;
pub mod memory;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cache::codec::CodecError;
use crate::cache::compressor::CompressionError;
use crate::cache::entry::Entry;
use crate::tier::remote::RemoteError;

/// Identifies a tier in the priority stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// Tier 0: in-process memory (hot).
    Memory,
    /// Tier 1: local disk (warm).
    Disk,
    /// Tier 2: remote key/value service (cold, shared).
    Remote,
}

impl TierKind {
    /// Returns the numeric tier level (lower = faster).
    pub fn level(&self) -> u8 {
        match self {
            TierKind::Memory => 0,
            TierKind::Disk => 1,
            TierKind::Remote => 2,
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierKind::Memory => write!(f, "memory"),
            TierKind::Disk => write!(f, "disk"),
            TierKind::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TierError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error("Corrupt entry for key {key:?}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("{tier} operation timed out after {after:?}")]
    Timeout { tier: TierKind, after: Duration },
}

pub type TierResult<T> = Result<T, TierError>;

/// One backing store in the cache's priority stack.
#[async_trait]
pub trait Tier: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Disabled tiers are skipped by the coordinator.
    fn is_enabled(&self) -> bool;

    /// TTL applied when the coordinator backfills into this tier.
    fn default_ttl(&self) -> Duration;

    /// Return the entry if present and not expired.
    async fn get(&self, key: &str) -> TierResult<Option<Arc<Entry>>>;

    /// Insert or replace an entry built from `value` and `ttl`.
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> TierResult<()>;

    /// Remove `key`; true if something was removed.
    async fn delete(&self, key: &str) -> TierResult<bool>;

    async fn has(&self, key: &str) -> TierResult<bool>;

    async fn clear(&self) -> TierResult<()>;
}
