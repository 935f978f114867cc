//! Integration tests for capacity eviction.

use std::time::{Duration, SystemTime};

use serde_json::json;
use tempfile::TempDir;

use tiered_cache::cache::evictor::{select_victims, EvictionCandidate};
use tiered_cache::tier::Tier;
use tiered_cache::{CacheConfig, CacheCoordinator, GetOptions, SetOptions};

fn candidate(key: &str, expires_in_secs: Option<u64>, seq: u64) -> EvictionCandidate {
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
    EvictionCandidate {
        key: key.to_string(),
        expires_at: expires_in_secs.map(|s| base + Duration::from_secs(s)),
        seq,
    }
}

#[test]
fn test_eviction_order_nearest_expiry_first() {
    let candidates = vec![
        candidate("forever", None, 0),
        candidate("late", Some(3600), 1),
        candidate("soon", Some(5), 2),
        candidate("mid", Some(60), 3),
    ];

    let order: Vec<String> = select_victims(candidates, 4)
        .into_iter()
        .map(|c| c.key)
        .collect();
    assert_eq!(order, vec!["soon", "mid", "late", "forever"]);
}

#[test]
fn test_eviction_ties_broken_by_insertion() {
    let candidates = vec![
        candidate("third", Some(60), 30),
        candidate("first", Some(60), 10),
        candidate("second", Some(60), 20),
    ];

    let victims = select_victims(candidates, 2);
    assert_eq!(victims.len(), 2);
    assert_eq!(victims[0].key, "first");
    assert_eq!(victims[1].key, "second");
}

#[test]
fn test_select_more_than_available() {
    let victims = select_victims(vec![candidate("only", None, 0)], 10);
    assert_eq!(victims.len(), 1);
    assert!(select_victims(Vec::new(), 3).is_empty());
}

#[tokio::test]
async fn test_memory_capacity_keeps_newest_keys() {
    let mut config = CacheConfig::memory_only();
    config.memory.max_keys = 2;
    let cache = CacheCoordinator::open(config).await.unwrap();

    cache.set("a", json!(1), None, SetOptions::default()).await;
    cache.set("b", json!(2), None, SetOptions::default()).await;
    cache.set("c", json!(3), None, SetOptions::default()).await;

    let memory = cache.memory().unwrap();
    let mut keys = memory.keys();
    keys.sort();
    assert_eq!(keys, vec!["b", "c"]);
    assert_eq!(memory.lookup("b").unwrap().value(), &json!(2));
    assert_eq!(memory.lookup("c").unwrap().value(), &json!(3));
    assert!(memory.lookup("a").is_none());
    assert_eq!(cache.stats().memory.evictions, 1);
}

#[tokio::test]
async fn test_capacity_plus_one_leaves_capacity_resident() {
    let dir = TempDir::new().unwrap();
    let mut config = CacheConfig::default();
    config.disk.path = dir.path().join("cache");
    config.janitor.enabled = false;
    config.memory.max_keys = 8;
    let cache = CacheCoordinator::open(config).await.unwrap();

    for i in 0..9 {
        cache
            .set(&format!("k{i}"), json!(i), None, SetOptions::default())
            .await;
    }

    let memory = cache.memory().unwrap();
    assert_eq!(memory.len(), 8);
    assert!(memory.lookup("k0").is_none());

    // The evicted key is still served by the disk tier.
    assert_eq!(cache.get("k0", GetOptions::default()).await, Some(json!(0)));
    assert_eq!(cache.stats().disk_hits, 1);
}

#[tokio::test]
async fn test_expired_keys_purged_before_eviction() {
    let mut config = CacheConfig::memory_only();
    config.memory.max_keys = 2;
    let cache = CacheCoordinator::open(config).await.unwrap();

    cache
        .set("short", json!(1), Some(Duration::from_millis(20)), SetOptions::default())
        .await;
    cache.set("keep", json!(2), None, SetOptions::default()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    cache.set("new", json!(3), None, SetOptions::default()).await;

    let memory = cache.memory().unwrap();
    assert!(memory.contains("keep"));
    assert!(memory.contains("new"));
    assert_eq!(memory.evictions(), 0);
}

#[tokio::test]
async fn test_disk_sweep_evicts_to_low_watermark() {
    let dir = TempDir::new().unwrap();
    let mut config = CacheConfig::default();
    config.disk.path = dir.path().join("cache");
    config.janitor.enabled = false;
    let cache = CacheCoordinator::open(config.clone()).await.unwrap();

    let payload = "x".repeat(200);
    for i in 0..10 {
        cache
            .set(&format!("k{i}"), json!(payload), None, SetOptions::default())
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let used = cache.stats().disk.size;
    cache.close().await.unwrap();

    // Reopen with a cap at half the current usage.
    config.disk.max_bytes = used / 2;
    config.disk.low_watermark = 0.5;
    let cache = CacheCoordinator::open(config.clone()).await.unwrap();
    let report = cache.cleanup().await.unwrap();

    assert!(report.evicted > 0);
    assert!(report.bytes_used <= (config.disk.max_bytes as f64 * 0.5) as u64);
    let disk = cache.disk().unwrap();
    assert!(!disk.file_path("k0").exists());
    assert!(Tier::has(disk.as_ref(), "k9").await.unwrap());
}
