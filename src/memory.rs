//! Bounded in-memory layer
//!
//! A byte-budgeted map with per-entry expiry. Inserting past the budget
//! evicts least-recently-inserted entries until the newcomer fits. An entry
//! accounts for its key plus its encoded envelope.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::config::LayerConfig;
use crate::layer::{CacheLayer, LayerCore};
use crate::payload::StoredEnvelope;
use crate::CacheError;

struct Entry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
    cost: usize,
}

#[derive(Default)]
struct Store {
    map: HashMap<String, Entry>,
    /// Insertion order, oldest first. Holds exactly the keys in `map`.
    order: VecDeque<String>,
    used: usize,
}

impl Store {
    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.map.remove(key) {
            self.used -= entry.cost;
            self.order.retain(|k| k != key);
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self.order.pop_front() {
            if let Some(entry) = self.map.remove(&key) {
                self.used -= entry.cost;
            }
        }
    }
}

/// Bounded in-memory cache layer.
pub struct InMemoryLayer {
    core: LayerCore,
    max_bytes: usize,
    store: RwLock<Store>,
}

impl InMemoryLayer {
    pub fn new(name: &str, config: &LayerConfig) -> Result<Self, CacheError> {
        Ok(Self {
            core: LayerCore::new(name, config)?,
            max_bytes: config.max_memory,
            store: RwLock::new(Store::default()),
        })
    }

    fn expiry(&self) -> Option<Instant> {
        let ttl = self.core.hard_ttl();
        if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        }
    }
}

#[async_trait]
impl CacheLayer for InMemoryLayer {
    async fn get(&self, key: &str) -> Result<Option<StoredEnvelope>, CacheError> {
        self.core.recall()?;
        let now = Instant::now();
        let mut store = self.store.write().await;
        let expired = store
            .map
            .get(key)
            .is_some_and(|entry| entry.expires_at.is_some_and(|at| at <= now));
        if expired {
            store.remove(key);
            return Ok(None);
        }
        match store.map.get(key) {
            Some(entry) => self.core.decode(&entry.bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, envelope: &StoredEnvelope) -> Result<(), CacheError> {
        let bytes = self.core.encode(envelope)?;
        let cost = key.len() + bytes.len();
        if self.max_bytes > 0 && cost > self.max_bytes {
            debug!(
                layer = self.core.name(),
                key, cost, "entry exceeds the whole memory budget, not stored"
            );
            return Ok(());
        }

        let mut store = self.store.write().await;
        store.remove(key);
        if self.max_bytes > 0 {
            while store.used + cost > self.max_bytes {
                store.evict_oldest();
            }
        }
        store.used += cost;
        store.order.push_back(key.to_owned());
        store.map.insert(
            key.to_owned(),
            Entry {
                bytes,
                expires_at: self.expiry(),
                cost,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        *self.store.write().await = Store::default();
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Duration {
        let store = self.store.read().await;
        match store.map.get(key).and_then(|entry| entry.expires_at) {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    fn name(&self) -> &str {
        self.core.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayerKind;
    use crate::payload::Envelope;

    fn layer(ttl: Duration, max_bytes: usize) -> InMemoryLayer {
        let config = LayerConfig {
            kind: LayerKind::Memory,
            ttl,
            amnesia: 0,
            compression: false,
            max_memory: max_bytes,
            address: None,
            slaves: vec![],
            db: 0,
            idle_timeout: Duration::ZERO,
            cluster: vec![],
        };
        InMemoryLayer::new("mem", &config).unwrap()
    }

    fn envelope(value: &str) -> StoredEnvelope {
        Envelope::now(&value.to_owned()).into_stored().unwrap()
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let layer = layer(Duration::from_secs(60), 0);
        layer.set("k", &envelope("v")).await.unwrap();
        let hit = layer.get("k").await.unwrap().unwrap();
        assert_eq!(hit.decode_into::<String>().unwrap(), "v");
        assert!(layer.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entries_expire_by_hard_ttl() {
        let layer = layer(Duration::from_millis(30), 0);
        layer.set("k", &envelope("v")).await.unwrap();
        assert!(layer.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(layer.get("k").await.unwrap().is_none());
        assert_eq!(layer.ttl("k").await, Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_ttl_means_no_expiry() {
        let layer = layer(Duration::ZERO, 0);
        layer.set("k", &envelope("v")).await.unwrap();
        assert_eq!(layer.ttl("k").await, Duration::ZERO);
        assert!(layer.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ttl_reports_remaining_time() {
        let layer = layer(Duration::from_secs(60), 0);
        layer.set("k", &envelope("v")).await.unwrap();
        let remaining = layer.ttl("k").await;
        assert!(remaining > Duration::from_secs(59));
        assert!(remaining <= Duration::from_secs(60));
        assert_eq!(layer.ttl("absent").await, Duration::ZERO);
    }

    #[tokio::test]
    async fn budget_evicts_least_recently_inserted() {
        // Each entry is ~150 bytes; the budget holds two but not three.
        let layer = layer(Duration::from_secs(60), 350);
        let value = "x".repeat(100);
        layer.set("k1", &envelope(&value)).await.unwrap();
        layer.set("k2", &envelope(&value)).await.unwrap();
        layer.set("k3", &envelope(&value)).await.unwrap();

        assert!(layer.get("k1").await.unwrap().is_none());
        assert!(layer.get("k2").await.unwrap().is_some());
        assert!(layer.get("k3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn overwrite_reclaims_the_old_entry_cost() {
        let layer = layer(Duration::from_secs(60), 350);
        let value = "x".repeat(100);
        for _ in 0..10 {
            layer.set("k1", &envelope(&value)).await.unwrap();
        }
        layer.set("k2", &envelope(&value)).await.unwrap();
        assert!(layer.get("k1").await.unwrap().is_some());
        assert!(layer.get("k2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oversized_entry_is_skipped() {
        let layer = layer(Duration::from_secs(60), 64);
        layer.set("big", &envelope(&"x".repeat(500))).await.unwrap();
        assert!(layer.get("big").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let layer = layer(Duration::from_secs(60), 0);
        layer.set("k1", &envelope("v")).await.unwrap();
        layer.set("k2", &envelope("v")).await.unwrap();
        layer.delete("k1").await.unwrap();
        assert!(layer.get("k1").await.unwrap().is_none());
        layer.clear().await.unwrap();
        assert!(layer.get("k2").await.unwrap().is_none());
    }
}
