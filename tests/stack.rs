//! End-to-end scenarios over in-process layer stacks built from configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tiercache::{CacheError, CacheRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    name: String,
    class_number: i32,
    meta: std::collections::HashMap<String, String>,
}

fn sample_user() -> User {
    User {
        name: "ada".to_owned(),
        class_number: 10,
        meta: std::collections::HashMap::from([("room".to_owned(), "20".to_owned())]),
    }
}

async fn registry(tree: serde_json::Value) -> CacheRegistry {
    let config = serde_json::from_value(tree).unwrap();
    CacheRegistry::new(&config, None, None).await.unwrap()
}

#[tokio::test]
async fn struct_values_round_trip_through_the_stack() {
    let registry = registry(json!({
        "result": {
            "soft-ttl": "1m",
            "layers": ["front", "store"],
            "front": {"type": "fastmemory", "ttl": "1m"},
            "store": {"type": "memory", "ttl": "10m", "max-memory": 1048576}
        }
    }))
    .await;
    let cache = registry.select("result").unwrap();

    cache.set("user:1", &sample_user()).await.unwrap();
    let out: User = cache.get("user:1").await.unwrap();
    assert_eq!(out, sample_user());
}

#[tokio::test]
async fn deep_hit_back_fills_the_front_layer() {
    let registry = registry(json!({
        "result": {
            "soft-ttl": "1m",
            "layers": ["front", "store"],
            "front": {"type": "fastmemory", "ttl": "1m"},
            "store": {"type": "memory", "ttl": "10m"}
        }
    }))
    .await;
    let cache = registry.select("result").unwrap();

    cache.set("user:1", &sample_user()).await.unwrap();
    // Evict from the front layer only; the store keeps the entry.
    cache.flush("front").await.unwrap();
    assert!(matches!(cache.ttl("user:1").await, Some((1, _))));

    let out: User = cache.get("user:1").await.unwrap();
    assert_eq!(out, sample_user());

    // Once back-fill drains, the front layer answers the TTL probe again.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (layer_index, remaining) = cache.ttl("user:1").await.unwrap();
    assert_eq!(layer_index, 0);
    assert!(remaining > Duration::ZERO);
}

#[tokio::test]
async fn compressed_layer_round_trips() {
    let registry = registry(json!({
        "result": {
            "soft-ttl": "1m",
            "layers": ["store"],
            "store": {"type": "memory", "ttl": "10m", "compression": true}
        }
    }))
    .await;
    let cache = registry.select("result").unwrap();

    cache.set("user:1", &sample_user()).await.unwrap();
    let out: User = cache.get("user:1").await.unwrap();
    assert_eq!(out, sample_user());
}

#[tokio::test]
async fn soft_ttl_flip_keeps_the_payload() {
    let registry = registry(json!({
        "result": {
            "soft-ttl": "200ms",
            "layers": ["store"],
            "store": {"type": "memory", "ttl": "10m"}
        }
    }))
    .await;
    let cache = registry.select("result").unwrap();

    cache.set("k", &1u32).await.unwrap();
    let (value, should_update) = cache.get_and_should_update::<u32>("k").await.unwrap();
    assert_eq!(value, 1);
    assert!(!should_update);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let (value, should_update) = cache.get_and_should_update::<u32>("k").await.unwrap();
    assert_eq!(value, 1);
    assert!(should_update);
}

#[tokio::test]
async fn delete_fans_out_to_every_layer() {
    let registry = registry(json!({
        "result": {
            "soft-ttl": "1m",
            "layers": ["front", "probe", "store"],
            "front": {"type": "fastmemory", "ttl": "1m"},
            "probe": {"type": "tiny"},
            "store": {"type": "memory", "ttl": "10m"}
        }
    }))
    .await;
    let cache = registry.select("result").unwrap();

    cache.set("k", &"v".to_owned()).await.unwrap();
    cache.delete("k").await.unwrap();

    assert!(matches!(
        cache.get::<String>("k").await,
        Err(CacheError::Miss)
    ));
    assert!(cache.ttl("k").await.is_none());
}

#[tokio::test]
async fn amnesiac_stack_degrades_to_misses() {
    let registry = registry(json!({
        "result": {
            "soft-ttl": "1m",
            "layers": ["store"],
            "store": {"type": "memory", "ttl": "10m", "amnesia": 100}
        }
    }))
    .await;
    let cache = registry.select("result").unwrap();

    cache.set("k", &"v".to_owned()).await.unwrap();
    for _ in 0..20 {
        assert!(matches!(
            cache.get::<String>("k").await,
            Err(CacheError::Miss)
        ));
    }
}
