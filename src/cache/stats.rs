//! Cache statistics.
//!
//! Process-lifetime counters kept in atomics, plus a serializable snapshot
//! combining them with live tier information.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::tier::disk::DiskTier;
use crate::tier::memory::MemoryTier;
use crate::tier::remote::RemoteTier;
use crate::tier::{Tier, TierKind};

/// Hit rate guarded against an empty denominator.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Atomic counters, reset only on restart.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    remote_hits: AtomicU64,
    remote_misses: AtomicU64,
    promotions: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A lookup served by `tier`.
    pub fn record_hit(&self, tier: TierKind) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        let counter = match tier {
            TierKind::Memory => &self.memory_hits,
            TierKind::Disk => &self.disk_hits,
            TierKind::Remote => &self.remote_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// `tier` was queried and did not have the key.
    pub fn record_tier_miss(&self, tier: TierKind) {
        match tier {
            TierKind::Memory => {}
            TierKind::Disk => {
                self.disk_misses.fetch_add(1, Ordering::Relaxed);
            }
            TierKind::Remote => {
                self.remote_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// No tier had the key.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits(), self.misses())
    }

    /// Combine the counters with live tier information.
    pub fn snapshot(
        &self,
        memory: &MemoryTier,
        disk: &DiskTier,
        remote: &RemoteTier,
    ) -> StatsSnapshot {
        let hits = self.hits();
        let misses = self.misses();
        StatsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors(),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            disk_misses: self.disk_misses.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            remote_misses: self.remote_misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            bytes_saved: disk.bytes_saved(),
            hit_rate: hit_rate(hits, misses),
            memory: MemoryStats {
                keys: memory.len(),
                max_keys: memory.max_keys(),
                evictions: memory.evictions(),
            },
            disk: DiskStats {
                size: disk.bytes_used(),
                max_bytes: disk.max_bytes(),
                enabled: disk.is_enabled(),
            },
            remote: RemoteStats {
                connected: remote.is_connected(),
                enabled: remote.is_enabled(),
            },
        }
    }
}

/// Point-in-time statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub disk_misses: u64,
    pub remote_hits: u64,
    pub remote_misses: u64,
    pub promotions: u64,
    /// Cumulative bytes saved by disk compression.
    pub bytes_saved: u64,
    pub hit_rate: f64,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub remote: RemoteStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub keys: usize,
    pub max_keys: usize,
    pub evictions: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskStats {
    /// Bytes currently used on disk.
    pub size: u64,
    pub max_bytes: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemoteStats {
    pub connected: bool,
    pub enabled: bool,
}
