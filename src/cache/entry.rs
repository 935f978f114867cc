//! Cache entry types.
//!
//! An [`Entry`] is the immutable envelope every tier stores: the value, the
//! time it was created and its time-to-live. A `set` always builds a fresh
//! entry, so readers holding an `Arc<Entry>` never see a half-updated one.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single cached value.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    value: Value,
    created_at: SystemTime,
    /// Zero means the entry never expires.
    ttl: Duration,
}

impl Entry {
    /// Create a new entry stamped with the current time.
    pub fn new(value: Value, ttl: Duration) -> Self {
        Self::with_created_at(value, SystemTime::now(), ttl)
    }

    /// Create an entry with an explicit creation time.
    pub fn with_created_at(value: Value, created_at: SystemTime, ttl: Duration) -> Self {
        Self {
            value,
            created_at,
            ttl,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Absolute expiry time, or `None` for entries that never expire.
    pub fn expires_at(&self) -> Option<SystemTime> {
        if self.ttl.is_zero() {
            return None;
        }
        self.created_at.checked_add(self.ttl)
    }

    /// Whether the entry has expired as of `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        match self.expires_at() {
            Some(expiry) => now >= expiry,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Remaining lifetime as of `now`.
    ///
    /// `None` means the entry never expires; `Some(Duration::ZERO)` means it
    /// already has.
    pub fn remaining_at(&self, now: SystemTime) -> Option<Duration> {
        self.expires_at()
            .map(|expiry| expiry.duration_since(now).unwrap_or(Duration::ZERO))
    }

    /// Build the serialized form stored by the disk and remote tiers.
    pub fn to_record(&self, key: &str) -> Record {
        Record {
            key: key.to_string(),
            value: self.value.clone(),
            timestamp: millis_since_epoch(self.created_at),
            ttl: saturating_millis(self.ttl),
        }
    }

    /// Rebuild an entry from its serialized form.
    pub fn from_record(record: Record) -> Self {
        Self {
            value: record.value,
            created_at: UNIX_EPOCH + Duration::from_millis(record.timestamp),
            ttl: Duration::from_millis(record.ttl),
        }
    }
}

/// Serialized entry as written to disk files and the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Original (unsanitized) key, used to detect file-name collisions.
    pub key: String,
    pub value: Value,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Time-to-live in milliseconds (0 = never expires).
    pub ttl: u64,
}

/// Whole milliseconds in `duration`, clamped to `u64::MAX`.
pub fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(saturating_millis)
        .unwrap_or(0)
}
