//! Integration tests for the bounded TTL/LRU cache.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use exec_core::cache::{estimate_size, CacheConfig, CacheStore, SetOptions};

fn store(max_entries: usize) -> CacheStore<serde_json::Value> {
    CacheStore::new(CacheConfig {
        max_entries,
        ..Default::default()
    })
}

#[test]
fn test_set_then_get() {
    let cache = store(10);
    cache.set("user:1", json!({"name": "ada"}), SetOptions::default());
    assert_eq!(cache.get("user:1"), Some(json!({"name": "ada"})));
    assert_eq!(cache.get("user:2"), None);

    let stats = cache.stats();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.hit_rate, 0.5);
    assert_eq!(stats.miss_rate, 0.5);
}

#[test]
fn test_replacing_key_keeps_size_consistent() {
    let cache = store(10);
    cache.set("k", json!("short"), SetOptions::default());
    cache.set("k", json!("a considerably longer value"), SetOptions::default());

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().total_size, estimate_size(&json!("a considerably longer value")));
}

#[test]
fn test_entry_bound_evicts_least_recently_accessed() {
    let cache = store(2);
    cache.set("a", json!(1), SetOptions::default());
    cache.set("b", json!(2), SetOptions::default());
    cache.get("a");
    cache.set("c", json!(3), SetOptions::default());

    assert!(cache.contains_key("a"));
    assert!(!cache.contains_key("b"));
    assert!(cache.contains_key("c"));
    assert_eq!(cache.stats().eviction_count, 1);
}

#[test]
fn test_size_bound_is_respected() {
    let item = json!("x".repeat(100));
    let per_item = estimate_size(&item);
    let cache = CacheStore::new(CacheConfig {
        max_size: per_item * 3,
        max_entries: 100,
        ..Default::default()
    });

    for i in 0..10 {
        cache.set(format!("k{i}"), item.clone(), SetOptions::default());
        assert!(cache.stats().total_size <= per_item * 3);
    }
    assert_eq!(cache.len(), 3);
    assert!(cache.contains_key("k9"));
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expiry() {
    let cache = store(10);
    cache.set("session", json!("token"), SetOptions::ttl(Duration::from_secs(5)));
    cache.set("forever", json!("value"), SetOptions::default());

    tokio::time::advance(Duration::from_secs(4)).await;
    assert!(cache.get("session").is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(cache.get("session"), None);
    assert!(cache.get("forever").is_some());
    assert_eq!(cache.stats().expired_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_default_ttl_applies_when_unset() {
    let cache: CacheStore<serde_json::Value> = CacheStore::new(CacheConfig {
        default_ttl: Some(Duration::from_secs(1)),
        ..Default::default()
    });
    cache.set("k", json!(true), SetOptions::default());
    let info = cache.inspect("k").unwrap();
    assert_eq!(info.expires_at, Some(info.created_at + Duration::from_secs(1)));

    tokio::time::advance(Duration::from_millis(1500)).await;
    assert!(!cache.contains_key("k"));
}

#[test]
fn test_metadata_and_hits_are_tracked() {
    let cache = store(10);
    cache.set(
        "k",
        json!(1),
        SetOptions::default().with_metadata(json!({"source": "api"})),
    );
    cache.get("k");
    cache.get("k");

    let info = cache.inspect("k").unwrap();
    assert_eq!(info.hits, 2);
    assert_eq!(info.metadata, Some(json!({"source": "api"})));
}

#[test]
fn test_delete_and_clear() {
    let cache = store(10);
    cache.set("a", json!(1), SetOptions::default());
    cache.set("b", json!(2), SetOptions::default());

    assert!(cache.delete("a"));
    assert!(!cache.delete("a"));

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.stats().total_size, 0);
    assert_eq!(cache.stats().hit_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_loop_removes_expired_entries() {
    let cache = Arc::new(CacheStore::new(CacheConfig {
        cleanup_interval: Duration::from_secs(10),
        ..Default::default()
    }));
    cache.set("k", json!(1), SetOptions::ttl(Duration::from_secs(1)));

    let shutdown = CancellationToken::new();
    let handle = cache.spawn_cleanup_loop(shutdown.clone());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(cache.is_empty());

    shutdown.cancel();
    handle.await.unwrap();
}
