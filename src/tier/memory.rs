//! Memory tier: bounded in-process map with per-key TTL.
//!
//! Expired keys are removed lazily when touched, and in bulk by
//! [`MemoryTier::purge_expired`] (driven by the janitor). When a new key
//! would exceed `max_keys`, expired keys are purged first and then victims
//! are chosen by [`select_victims`]: nearest expiry first, oldest insertion
//! breaking ties. Writes are never rejected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::cache::entry::Entry;
use crate::cache::evictor::{select_victims, EvictionCandidate};
use crate::tier::{Tier, TierKind, TierResult};

#[derive(Debug)]
struct Slot {
    entry: Arc<Entry>,
    seq: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    slots: HashMap<String, Slot>,
    next_seq: u64,
}

impl MemoryState {
    fn purge_expired(&mut self, now: SystemTime) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.entry.is_expired_at(now));
        before - self.slots.len()
    }
}

/// The in-process tier.
#[derive(Debug)]
pub struct MemoryTier {
    state: Mutex<MemoryState>,
    /// 0 = unbounded.
    max_keys: usize,
    default_ttl: Duration,
    evictions: AtomicU64,
}

impl MemoryTier {
    pub fn new(max_keys: usize, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_keys,
            default_ttl,
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up `key`, removing it if it has expired.
    pub fn lookup(&self, key: &str) -> Option<Arc<Entry>> {
        let mut state = self.state.lock();
        match state.slots.get(key) {
            Some(slot) if !slot.entry.is_expired() => return Some(slot.entry.clone()),
            Some(_) => {}
            None => return None,
        }
        state.slots.remove(key);
        debug!(key, "Expired entry removed on read");
        None
    }

    /// Insert or replace `key`, evicting first if the tier is full.
    pub fn insert(&self, key: &str, value: Value, ttl: Duration) {
        let entry = Arc::new(Entry::new(value, ttl));
        let mut state = self.state.lock();

        if self.max_keys > 0 && !state.slots.contains_key(key) && state.slots.len() >= self.max_keys
        {
            self.make_room(&mut state);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.slots.insert(key.to_string(), Slot { entry, seq });
    }

    /// Evict until one more key fits.
    fn make_room(&self, state: &mut MemoryState) {
        let now = SystemTime::now();
        let purged = state.purge_expired(now);
        if purged > 0 {
            debug!(purged, "Purged expired entries before eviction");
        }

        let excess = (state.slots.len() + 1).saturating_sub(self.max_keys);
        if excess == 0 {
            return;
        }

        let candidates = state.slots.iter().map(|(key, slot)| EvictionCandidate {
            key: key.clone(),
            expires_at: slot.entry.expires_at(),
            seq: slot.seq,
        });

        for victim in select_victims(candidates, excess) {
            state.slots.remove(&victim.key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %victim.key, "Evicted entry from memory tier");
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.state.lock().slots.remove(key).is_some()
    }

    /// Existence check; expired keys are removed and reported absent.
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    pub fn flush(&self) {
        self.state.lock().slots.clear();
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.state.lock().purge_expired(SystemTime::now())
    }

    /// Number of resident keys (including not-yet-purged expired ones).
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().slots.keys().cloned().collect()
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Total capacity evictions since start-up.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Tier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn get(&self, key: &str) -> TierResult<Option<Arc<Entry>>> {
        Ok(self.lookup(key))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> TierResult<()> {
        self.insert(key, value.clone(), ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> TierResult<bool> {
        Ok(self.remove(key))
    }

    async fn has(&self, key: &str) -> TierResult<bool> {
        Ok(self.contains(key))
    }

    async fn clear(&self) -> TierResult<()> {
        self.flush();
        Ok(())
    }
}
