//! Tiny sentinel layer
//!
//! Stores nothing and always misses. Inserting one into a stack adds an
//! observation point (its layer index shows up in hit metrics) and forces
//! lookups one layer deeper without changing what callers see.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::LayerConfig;
use crate::layer::{CacheLayer, LayerCore};
use crate::payload::StoredEnvelope;
use crate::CacheError;

pub struct TinyLayer {
    core: LayerCore,
}

impl TinyLayer {
    pub fn new(name: &str, config: &LayerConfig) -> Result<Self, CacheError> {
        Ok(Self {
            core: LayerCore::new(name, config)?,
        })
    }
}

#[async_trait]
impl CacheLayer for TinyLayer {
    async fn get(&self, _key: &str) -> Result<Option<StoredEnvelope>, CacheError> {
        // Amnesia is still rolled for symmetry with the storing layers.
        self.core.recall()?;
        Ok(None)
    }

    async fn set(&self, _key: &str, _envelope: &StoredEnvelope) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn ttl(&self, _key: &str) -> Duration {
        Duration::ZERO
    }

    fn name(&self) -> &str {
        self.core.name()
    }
}
