//! Unbounded fast-memory layer
//!
//! A moka cache with a cache-wide time-to-live; moka's own housekeeping
//! sweeps expired entries, and an expired entry reads as absent either way.
//! Each slot keeps its expiry instant so `ttl` can answer with remaining
//! time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tokio::time::Instant;

use crate::config::LayerConfig;
use crate::layer::{CacheLayer, LayerCore};
use crate::payload::StoredEnvelope;
use crate::CacheError;

#[derive(Clone)]
struct Slot {
    bytes: Arc<Vec<u8>>,
    expires_at: Option<Instant>,
}

/// Unbounded in-process cache layer.
pub struct FastMemoryLayer {
    core: LayerCore,
    cache: Cache<String, Slot>,
}

impl FastMemoryLayer {
    pub fn new(name: &str, config: &LayerConfig) -> Result<Self, CacheError> {
        let core = LayerCore::new(name, config)?;
        let mut builder = Cache::builder();
        if !core.hard_ttl().is_zero() {
            builder = builder.time_to_live(core.hard_ttl());
        }
        Ok(Self {
            core,
            cache: builder.build(),
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
impl CacheLayer for FastMemoryLayer {
    async fn get(&self, key: &str) -> Result<Option<StoredEnvelope>, CacheError> {
        self.core.recall()?;
        match self.cache.get(key).await {
            None => Ok(None),
            Some(slot) if slot.expires_at.is_some_and(|at| at <= Instant::now()) => Ok(None),
            Some(slot) => self.core.decode(&slot.bytes).map(Some),
        }
    }

    async fn set(&self, key: &str, envelope: &StoredEnvelope) -> Result<(), CacheError> {
        let bytes = Arc::new(self.core.encode(envelope)?);
        let slot = Slot {
            bytes,
            expires_at: self.expiry(),
        };
        self.cache.insert(key.to_owned(), slot).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Duration {
        match self.cache.get(key).await.and_then(|slot| slot.expires_at) {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    fn name(&self) -> &str {
        self.core.name()
    }
}
