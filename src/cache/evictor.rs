//! Eviction policy: decides which entries leave a full tier first.
//!
//! Candidates are ranked by:
//! - Expiry time (nearest expiry → evicted first; never-expiring entries last)
//! - Insertion order as tie-breaker (oldest → evicted first)
//!
//! The memory tier ranks keys by entry expiry and insertion sequence; the disk
//! sweep ranks files by modification time plus the tier TTL.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::SystemTime;

/// An eviction candidate.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    /// Key (memory tier) or file name (disk tier).
    pub key: String,
    /// `None` for entries that never expire.
    pub expires_at: Option<SystemTime>,
    /// Monotonic insertion sequence; lower is older.
    pub seq: u64,
}

// Greater = higher eviction priority (popped first from the max-heap).
impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_expiry = match (self.expires_at, other.expires_at) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        by_expiry.then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for EvictionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EvictionCandidate {}

/// Select up to `count` victims, highest eviction priority first.
pub fn select_victims(
    candidates: impl IntoIterator<Item = EvictionCandidate>,
    count: usize,
) -> Vec<EvictionCandidate> {
    let mut heap: BinaryHeap<EvictionCandidate> = candidates.into_iter().collect();

    let mut victims = Vec::with_capacity(count.min(heap.len()));
    for _ in 0..count {
        match heap.pop() {
            Some(candidate) => victims.push(candidate),
            None => break,
        }
    }
    victims
}
