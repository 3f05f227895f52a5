//! Sharded redis layer
//!
//! The keyspace is split across shards by CRC32 of the key modulo the shard
//! count; that hash is part of the wire contract shared by every process
//! using the layer. Within a shard, writes and deletes always go to the
//! master and are never rerouted; reads prefer a uniformly-chosen healthy
//! slave and fall back to the master. A slave that errors, or that has been
//! idle past the configured idle-timeout, is only re-probed after exponential
//! backoff.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use crate::config::LayerConfig;
use crate::layer::{CacheLayer, LayerCore};
use crate::observer::LatencyTimer;
use crate::payload::StoredEnvelope;
use crate::redis_backend::redis_url;
use crate::CacheError;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct SlaveHealth {
    healthy: bool,
    retry_at: Instant,
    backoff: Duration,
    last_used: Instant,
}

impl SlaveHealth {
    fn new(now: Instant) -> Self {
        Self {
            healthy: true,
            retry_at: now,
            backoff: BACKOFF_BASE,
            last_used: now,
        }
    }

    /// Fresh: healthy and recently exercised.
    fn is_fresh(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.healthy
            && (idle_timeout.is_zero() || now.duration_since(self.last_used) <= idle_timeout)
    }

    /// Stale slaves (errored and past backoff, or idle too long) may be
    /// probed; the read itself is the probe.
    fn is_probe_candidate(&self, now: Instant, idle_timeout: Duration) -> bool {
        if self.healthy {
            !idle_timeout.is_zero() && now.duration_since(self.last_used) > idle_timeout
        } else {
            now >= self.retry_at
        }
    }

    fn record_success(&mut self, now: Instant) {
        self.healthy = true;
        self.backoff = BACKOFF_BASE;
        self.last_used = now;
    }

    fn record_failure(&mut self, now: Instant) {
        self.healthy = false;
        self.retry_at = now + self.backoff;
        self.backoff = (self.backoff * 2).min(BACKOFF_CAP);
    }
}

/// Uniform pick among fresh slaves, else among probe candidates.
fn choose_slave(health: &[SlaveHealth], now: Instant, idle_timeout: Duration) -> Option<usize> {
    let pick_uniform = |candidates: Vec<usize>| {
        if candidates.is_empty() {
            None
        } else {
            let i = rand::rng().random_range(0..candidates.len());
            Some(candidates[i])
        }
    };

    let fresh: Vec<usize> = (0..health.len())
        .filter(|&i| health[i].is_fresh(now, idle_timeout))
        .collect();
    pick_uniform(fresh).or_else(|| {
        let probes: Vec<usize> = (0..health.len())
            .filter(|&i| health[i].is_probe_candidate(now, idle_timeout))
            .collect();
        pick_uniform(probes)
    })
}

struct Shard {
    master: ConnectionManager,
    slaves: Vec<ConnectionManager>,
    health: Mutex<Vec<SlaveHealth>>,
}

/// Cache layer over a keyspace-sharded set of redis masters with read slaves.
pub struct ShardedRedisLayer {
    core: LayerCore,
    shards: Vec<Shard>,
    idle_timeout: Duration,
    timer: Arc<dyn LatencyTimer>,
}

fn shard_index(key: &str, shard_count: usize) -> usize {
    crc32fast::hash(key.as_bytes()) as usize % shard_count
}

async fn connect(address: &str, db: i64) -> Result<ConnectionManager, CacheError> {
    let client = redis::Client::open(redis_url(address, db))?;
    Ok(ConnectionManager::new(client).await?)
}

impl ShardedRedisLayer {
    /// Connect to every shard listed in `config.cluster`.
    pub async fn connect(
        name: &str,
        config: &LayerConfig,
        timer: Arc<dyn LatencyTimer>,
    ) -> Result<Self, CacheError> {
        let core = LayerCore::new(name, config)?;
        if config.cluster.is_empty() {
            return Err(CacheError::Config(format!(
                "sharded redis layer {name} has no shards"
            )));
        }
        let mut shards = Vec::with_capacity(config.cluster.len());
        for shard in &config.cluster {
            let master = connect(&shard.master, config.db).await?;
            let mut slaves = Vec::with_capacity(shard.slaves.len());
            for slave in &shard.slaves {
                slaves.push(connect(slave, config.db).await?);
            }
            let now = Instant::now();
            let health = Mutex::new(vec![SlaveHealth::new(now); slaves.len()]);
            shards.push(Shard {
                master,
                slaves,
                health,
            });
        }
        Ok(Self {
            core,
            shards,
            idle_timeout: config.idle_timeout,
            timer,
        })
    }

    fn shard(&self, key: &str) -> &Shard {
        &self.shards[shard_index(key, self.shards.len())]
    }

    async fn timed_get(
        &self,
        mut conn: ConnectionManager,
        key: &str,
    ) -> Result<Option<Vec<u8>>, redis::RedisError> {
        let start = Instant::now();
        let reply = conn.get(key).await;
        self.timer.observe_since(self.core.name(), "get", start);
        reply
    }
}

#[async_trait]
impl CacheLayer for ShardedRedisLayer {
    async fn get(&self, key: &str) -> Result<Option<StoredEnvelope>, CacheError> {
        self.core.recall()?;
        let shard = self.shard(key);

        let picked = {
            let health = shard.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            choose_slave(&health, Instant::now(), self.idle_timeout)
        };

        let reply = match picked {
            Some(i) => match self.timed_get(shard.slaves[i].clone(), key).await {
                Ok(reply) => {
                    let mut health = shard.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    health[i].record_success(Instant::now());
                    reply
                }
                Err(e) => {
                    warn!(
                        layer = self.core.name(),
                        slave = i,
                        error = %e,
                        "slave read failed, falling back to master"
                    );
                    {
                        let mut health = shard.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                        health[i].record_failure(Instant::now());
                    }
                    self.timed_get(shard.master.clone(), key).await?
                }
            },
            None => self.timed_get(shard.master.clone(), key).await?,
        };

        match reply {
            None => Ok(None),
            Some(bytes) => self.core.decode(&bytes).map(Some),
        }
    }

    async fn set(&self, key: &str, envelope: &StoredEnvelope) -> Result<(), CacheError> {
        let bytes = self.core.encode(envelope)?;
        let mut conn = self.shard(key).master.clone();
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
        let mut conn = self.shard(key).master.clone();
        let start = Instant::now();
        let reply: Result<(), _> = conn.del(key).await;
        self.timer.observe_since(self.core.name(), "delete", start);
        Ok(reply?)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        for shard in &self.shards {
            let mut conn = shard.master.clone();
            let start = Instant::now();
            let reply: Result<(), _> = redis::cmd("FLUSHDB").query_async(&mut conn).await;
            self.timer.observe_since(self.core.name(), "clear", start);
            reply?;
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Duration {
        // Slave expiries can lag; the master's answer is the binding one.
        let mut conn = self.shard(key).master.clone();
        let start = Instant::now();
        let reply: Result<i64, _> = conn.ttl(key).await;
        self.timer.observe_since(self.core.name(), "ttl", start);
        match reply {
            Ok(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => Duration::ZERO,
        }
    }

    fn name(&self) -> &str {
        self.core.name()
    }
}
