//! Single-node redis layer
//!
//! Keys hold the encoded envelope with the layer's hard TTL as the
//! server-side expiry. Every round-trip is reported to the latency timer
//! under `{layer, op}` labels.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::LayerConfig;
use crate::layer::{CacheLayer, LayerCore};
use crate::observer::LatencyTimer;
use crate::payload::StoredEnvelope;
use crate::CacheError;

pub(crate) fn redis_url(address: &str, db: i64) -> String {
    format!("redis://{address}/{db}")
}

/// Cache layer backed by one redis master.
pub struct RedisLayer {
    core: LayerCore,
    conn: ConnectionManager,
    timer: Arc<dyn LatencyTimer>,
}

impl RedisLayer {
    pub async fn connect(
        name: &str,
        config: &LayerConfig,
        timer: Arc<dyn LatencyTimer>,
    ) -> Result<Self, CacheError> {
        let core = LayerCore::new(name, config)?;
        let address = config.address.as_deref().ok_or_else(|| {
            CacheError::Config(format!("redis layer {name} is missing an address"))
        })?;
        let client = redis::Client::open(redis_url(address, config.db))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { core, conn, timer })
    }
}

#[async_trait]
impl CacheLayer for RedisLayer {
    async fn get(&self, key: &str) -> Result<Option<StoredEnvelope>, CacheError> {
        self.core.recall()?;
        let mut conn = self.conn.clone();
        let start = Instant::now();
        let reply: Result<Option<Vec<u8>>, _> = conn.get(key).await;
        self.timer.observe_since(self.core.name(), "get", start);
        match reply? {
            None => Ok(None),
            Some(bytes) => self.core.decode(&bytes).map(Some),
        }
    }

    async fn set(&self, key: &str, envelope: &StoredEnvelope) -> Result<(), CacheError> {
        let bytes = self.core.encode(envelope)?;
        let mut conn = self.conn.clone();
        let ttl = self.core.hard_ttl();
        let start = Instant::now();
        let reply: Result<(), _> = if ttl.is_zero() {
            conn.set(key, bytes).await
        } else {
            conn.set_ex(key, bytes, ttl.as_secs().max(1)).await
        };
        self.timer.observe_since(self.core.name(), "set", start);
        Ok(reply?)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let start = Instant::now();
        let reply: Result<(), _> = conn.del(key).await;
        self.timer.observe_since(self.core.name(), "delete", start);
        Ok(reply?)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        // The connection is bound to the configured DB, so this only flushes
        // this layer's keyspace.
        let mut conn = self.conn.clone();
        let start = Instant::now();
        let reply: Result<(), _> = redis::cmd("FLUSHDB").query_async(&mut conn).await;
        self.timer.observe_since(self.core.name(), "clear", start);
        Ok(reply?)
    }

    async fn ttl(&self, key: &str) -> Duration {
        let mut conn = self.conn.clone();
        let start = Instant::now();
        let reply: Result<i64, _> = conn.ttl(key).await;
        self.timer.observe_since(self.core.name(), "ttl", start);
        match reply {
            // -2 means absent, -1 means no server-side expiry.
            Ok(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => Duration::ZERO,
        }
    }

    fn name(&self) -> &str {
        self.core.name()
    }
}
