//! Layer contract and construction
//!
//! A layer stores opaque envelopes under string keys and enforces its own
//! hard TTL. Misses are `Ok(None)`; the amnesia injector reports
//! [`CacheError::Amnesia`] so diagnostics can tell the two apart, but the
//! coordinator treats both as an ordinary miss. Cancellation and deadlines
//! are the caller's: every method is an `.await` point, and callers bound it
//! with `tokio::time::timeout` or drop the future.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::amnesia::should_forget;
use crate::config::{LayerConfig, LayerKind, ShardConfig};
use crate::fastmemory::FastMemoryLayer;
use crate::memory::InMemoryLayer;
use crate::observer::LatencyTimer;
use crate::payload::{StoredEnvelope, decode_payload, encode_payload};
use crate::redis_backend::RedisLayer;
use crate::redis_cluster::ShardedRedisLayer;
use crate::tiny::TinyLayer;
use crate::CacheError;

/// Contract every cache layer implements.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Look up a key. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<StoredEnvelope>, CacheError>;

    /// Store an envelope under the layer's hard TTL.
    async fn set(&self, key: &str, envelope: &StoredEnvelope) -> Result<(), CacheError>;

    /// Remove a key if present.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Drop everything this layer holds.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Remaining lifetime of a key; zero when absent or unsupported.
    async fn ttl(&self, key: &str) -> Duration;

    /// Configured layer name.
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn CacheLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLayer").field("name", &self.name()).finish()
    }
}

/// State common to every layer kind.
#[derive(Debug, Clone)]
pub(crate) struct LayerCore {
    name: String,
    amnesia_chance: u8,
    compression: bool,
    hard_ttl: Duration,
}

impl LayerCore {
    pub(crate) fn new(name: &str, config: &LayerConfig) -> Result<Self, CacheError> {
        if config.amnesia > 100 {
            return Err(CacheError::Config(format!(
                "layer {name}: amnesia chance {} out of range 0..=100",
                config.amnesia
            )));
        }
        Ok(Self {
            name: name.to_owned(),
            amnesia_chance: config.amnesia,
            compression: config.compression,
            hard_ttl: config.ttl,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Hard TTL of this layer; zero means the backend default (no expiry).
    pub(crate) fn hard_ttl(&self) -> Duration {
        self.hard_ttl
    }

    /// Rolls the amnesia die. `Err` means this read pretends to miss.
    pub(crate) fn recall(&self) -> Result<(), CacheError> {
        if should_forget(self.amnesia_chance) {
            Err(CacheError::Amnesia {
                chance: self.amnesia_chance,
            })
        } else {
            Ok(())
        }
    }

    pub(crate) fn encode(&self, envelope: &StoredEnvelope) -> Result<Vec<u8>, CacheError> {
        encode_payload(envelope, self.compression)
    }

    pub(crate) fn decode(&self, bytes: &[u8]) -> Result<StoredEnvelope, CacheError> {
        decode_payload(bytes, self.compression)
    }
}

/// Build a layer from its settings block.
pub(crate) async fn build_layer(
    name: &str,
    config: &LayerConfig,
    timer: Arc<dyn LatencyTimer>,
) -> Result<Arc<dyn CacheLayer>, CacheError> {
    match config.kind {
        LayerKind::Memory => Ok(Arc::new(InMemoryLayer::new(name, config)?)),
        LayerKind::FastMemory => Ok(Arc::new(FastMemoryLayer::new(name, config)?)),
        LayerKind::Tiny => Ok(Arc::new(TinyLayer::new(name, config)?)),
        LayerKind::Redis => Ok(Arc::new(RedisLayer::connect(name, config, timer).await?)),
        LayerKind::Guardian => {
            // The legacy single-shard master+slaves shape is a one-shard
            // sharded layer.
            let master = config.address.clone().ok_or_else(|| {
                CacheError::Config(format!("gaurdian layer {name} is missing an address"))
            })?;
            let mut shaped = config.clone();
            shaped.cluster = vec![ShardConfig {
                master,
                slaves: config.slaves.clone(),
            }];
            Ok(Arc::new(
                ShardedRedisLayer::connect(name, &shaped, timer).await?,
            ))
        }
        LayerKind::RedisCluster => Ok(Arc::new(
            ShardedRedisLayer::connect(name, config, timer).await?,
        )),
    }
}
