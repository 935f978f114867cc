//! Integration tests for the cache coordinator.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use tiered_cache::tier::Tier;
use tiered_cache::{
    CacheBuilder, CacheConfig, CacheCoordinator, GetOptions, InProcessBackend, SetOptions,
};

fn test_config(dir: &TempDir) -> CacheConfig {
    let mut config = CacheConfig::default();
    config.disk.path = dir.path().join("cache");
    config.janitor.enabled = false;
    config
}

async fn open_with_remote(dir: &TempDir, backend: &InProcessBackend) -> CacheCoordinator {
    CacheBuilder::new(test_config(dir))
        .remote_backend(Arc::new(backend.clone()))
        .open()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_set_then_get_roundtrip() {
    let dir = TempDir::new().unwrap();
    let cache = CacheCoordinator::open(test_config(&dir)).await.unwrap();

    let values = [
        json!(null),
        json!(42),
        json!("text"),
        json!([1, 2, 3]),
        json!({"nested": {"list": [true, false], "n": 1.5}}),
    ];
    for (i, value) in values.iter().enumerate() {
        let key = format!("key:{i}");
        assert!(cache.set(&key, value.clone(), None, SetOptions::default()).await);
        assert_eq!(cache.get(&key, GetOptions::default()).await.as_ref(), Some(value));
    }

    cache.close().await.unwrap();
}

#[tokio::test]
async fn test_ttl_expiry_across_tiers() {
    let dir = TempDir::new().unwrap();
    let cache = CacheCoordinator::open(test_config(&dir)).await.unwrap();

    cache
        .set("k", json!("v"), Some(Duration::from_secs(1)), SetOptions::default())
        .await;
    assert_eq!(cache.get("k", GetOptions::default()).await, Some(json!("v")));

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(cache.get("k", GetOptions::default()).await, None);
    assert!(!cache.disk().unwrap().file_path("k").exists());
}

#[tokio::test]
async fn test_has_false_after_ttl_elapses() {
    let dir = TempDir::new().unwrap();
    let cache = CacheCoordinator::open(test_config(&dir)).await.unwrap();

    cache
        .set("k", json!("v"), Some(Duration::from_secs(1)), SetOptions::default())
        .await;
    assert!(cache.has("k").await);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(!cache.has("k").await);
    assert!(!cache.disk().unwrap().file_path("k").exists());
    assert_eq!(cache.get("k", GetOptions::default()).await, None);
}

#[tokio::test]
async fn test_has_agrees_with_get_on_name_collision() {
    let dir = TempDir::new().unwrap();
    let cache = CacheCoordinator::open(test_config(&dir)).await.unwrap();

    cache.set("a/b", json!(1), None, SetOptions::default()).await;
    assert!(cache.has("a/b").await);
    assert!(!cache.has("a:b").await);
    assert_eq!(cache.get("a:b", GetOptions::default()).await, None);
}

#[tokio::test]
async fn test_disk_hit_promotes_to_memory() {
    let dir = TempDir::new().unwrap();
    let cache = CacheCoordinator::open(test_config(&dir)).await.unwrap();

    cache.set("k", json!({"v": 1}), None, SetOptions::default()).await;
    let memory = cache.memory().unwrap();
    memory.flush();
    assert!(memory.lookup("k").is_none());

    assert_eq!(cache.get("k", GetOptions::default()).await, Some(json!({"v": 1})));
    assert!(memory.lookup("k").is_some());

    let stats = cache.stats();
    assert_eq!(stats.disk_hits, 1);
    assert_eq!(stats.memory_hits, 0);
    assert_eq!(stats.promotions, 1);

    // The next lookup is served from memory.
    cache.get("k", GetOptions::default()).await;
    assert_eq!(cache.stats().memory_hits, 1);
}

#[tokio::test]
async fn test_remote_hit_promotes_to_every_faster_tier() {
    let dir = TempDir::new().unwrap();
    let backend = InProcessBackend::new();
    let cache = open_with_remote(&dir, &backend).await;

    cache.set("shared", json!("from-remote"), None, SetOptions::default()).await;
    cache.memory().unwrap().flush();
    Tier::clear(cache.disk().unwrap().as_ref()).await.unwrap();

    assert_eq!(
        cache.get("shared", GetOptions::default()).await,
        Some(json!("from-remote"))
    );
    assert!(cache.memory().unwrap().lookup("shared").is_some());
    assert!(cache.disk().unwrap().file_path("shared").exists());

    let stats = cache.stats();
    assert_eq!(stats.remote_hits, 1);
    assert_eq!(stats.disk_misses, 1);
    assert_eq!(stats.promotions, 2);
}

#[tokio::test]
async fn test_unreachable_remote_degrades() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.remote.enabled = true;
    config.remote.url = Some("http://127.0.0.1:1/kv".to_string());
    config.timeouts.operation_ms = 500;

    let cache = CacheCoordinator::open(config).await.unwrap();
    let stats = cache.stats();
    assert!(!stats.remote.enabled);
    assert!(!stats.remote.connected);

    assert!(cache.set("k", json!(1), None, SetOptions::default()).await);
    assert_eq!(cache.get("k", GetOptions::default()).await, Some(json!(1)));
    assert_eq!(cache.stats().errors, 0);
}

#[tokio::test]
async fn test_remote_outage_counts_errors() {
    let dir = TempDir::new().unwrap();
    let backend = InProcessBackend::new();
    let cache = open_with_remote(&dir, &backend).await;

    backend.set_available(false);
    assert!(cache.set("k", json!(1), None, SetOptions::default()).await);
    assert!(!cache.stats().remote.connected);
    assert!(cache.stats().errors >= 1);

    // Memory and disk still serve the value.
    assert_eq!(cache.get("k", GetOptions::default()).await, Some(json!(1)));
}

#[tokio::test]
async fn test_delete_fans_out_to_every_tier() {
    let dir = TempDir::new().unwrap();
    let backend = InProcessBackend::new();
    let cache = open_with_remote(&dir, &backend).await;

    cache.set("k", json!("v"), None, SetOptions::default()).await;
    let memory = cache.memory().unwrap();
    let disk = cache.disk().unwrap();
    let remote = cache.remote().unwrap();
    assert!(Tier::get(memory.as_ref(), "k").await.unwrap().is_some());
    assert!(Tier::get(disk.as_ref(), "k").await.unwrap().is_some());
    assert!(Tier::get(remote.as_ref(), "k").await.unwrap().is_some());

    assert!(cache.delete("k").await);
    assert!(Tier::get(memory.as_ref(), "k").await.unwrap().is_none());
    assert!(Tier::get(disk.as_ref(), "k").await.unwrap().is_none());
    assert!(Tier::get(remote.as_ref(), "k").await.unwrap().is_none());
    assert_eq!(cache.get("k", GetOptions::default()).await, None);

    assert!(!cache.delete("k").await);
    assert_eq!(cache.stats().deletes, 1);
}

#[tokio::test]
async fn test_memory_hit_is_recorded() {
    let dir = TempDir::new().unwrap();
    let cache = CacheCoordinator::open(test_config(&dir)).await.unwrap();

    cache
        .set(
            "user:1",
            json!({"name": "Ana"}),
            Some(Duration::from_secs(60)),
            SetOptions::default(),
        )
        .await;
    assert_eq!(
        cache.get("user:1", GetOptions::default()).await,
        Some(json!({"name": "Ana"}))
    );

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.memory_hits, 1);
    assert_eq!(stats.sets, 1);
    assert_eq!(stats.hit_rate, 1.0);
}

#[tokio::test]
async fn test_miss_and_hit_rate() {
    let cache = CacheCoordinator::open(CacheConfig::memory_only())
        .await
        .unwrap();
    assert_eq!(cache.stats().hit_rate, 0.0);

    cache.set("a", json!(1), None, SetOptions::default()).await;
    cache.get("a", GetOptions::default()).await;
    assert_eq!(cache.get("missing", GetOptions::default()).await, None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.5).abs() < 1e-10);
}

#[tokio::test]
async fn test_has_and_flush() {
    let dir = TempDir::new().unwrap();
    let backend = InProcessBackend::new();
    let cache = open_with_remote(&dir, &backend).await;

    cache.set("a", json!(1), None, SetOptions::default()).await;
    cache.set("b", json!(2), None, SetOptions::default()).await;
    assert!(cache.has("a").await);
    assert!(!cache.has("z").await);

    // Present only in a slower tier.
    cache.memory().unwrap().flush();
    assert!(cache.has("b").await);

    cache.flush().await;
    assert!(!cache.has("a").await);
    assert!(!cache.has("b").await);
    assert!(backend.is_empty());
    assert_eq!(cache.stats().disk.size, 0);
}
