//! Cache configuration
//!
//! The tree mirrors the conventional `cache.<instance>.<layer>` layout:
//! an instance names its ordered layers, and each named layer carries its own
//! settings block. The structs deserialize from any serde format; durations
//! use humantime strings ("90s", "10m").

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Top of the tree: instance name to instance settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    #[serde(flatten)]
    pub instances: HashMap<String, InstanceConfig>,
}

/// One named cache instance: a soft TTL and an ordered layer stack.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceConfig {
    /// Advisory freshness threshold enforced by the coordinator only.
    #[serde(rename = "soft-ttl", with = "humantime_serde", default)]
    pub soft_ttl: Duration,

    /// Layer names in read-preference order; index 0 is the shallowest.
    #[serde(default)]
    pub layers: Vec<String>,

    /// Per-layer settings, keyed by the names listed in `layers`.
    #[serde(flatten)]
    pub layer_settings: HashMap<String, LayerConfig>,
}

impl InstanceConfig {
    /// Settings block for a named layer.
    pub fn layer(&self, name: &str) -> Option<&LayerConfig> {
        self.layer_settings.get(name)
    }
}

/// Settings of a single cache layer.
#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
    #[serde(rename = "type")]
    pub kind: LayerKind,

    /// Hard TTL enforced inside the layer. Zero means the backend default:
    /// in-process layers keep entries forever, redis stores without expiry.
    #[serde(with = "humantime_serde", default)]
    pub ttl: Duration,

    /// Chance (0..=100) of a synthetic miss on every read of this layer.
    #[serde(default)]
    pub amnesia: u8,

    /// Zlib-wrap payloads in this layer. Must match across every writer and
    /// reader of a shared layer.
    #[serde(default)]
    pub compression: bool,

    /// Byte budget of the bounded memory layer.
    #[serde(rename = "max-memory", default)]
    pub max_memory: usize,

    /// `host:port` of a single redis master.
    #[serde(default)]
    pub address: Option<String>,

    /// Read slaves of a `gaurdian` layer.
    #[serde(default)]
    pub slaves: Vec<String>,

    /// Redis logical database.
    #[serde(default)]
    pub db: i64,

    /// A cluster slave idle for longer is considered unhealthy until re-probed.
    #[serde(rename = "idle-timeout", with = "humantime_serde", default)]
    pub idle_timeout: Duration,

    /// Shard list of a `rediscluster` layer.
    #[serde(default)]
    pub cluster: Vec<ShardConfig>,
}

/// One shard of a sharded redis layer: a master and its read slaves.
#[derive(Debug, Clone, Deserialize)]
pub struct ShardConfig {
    pub master: String,
    #[serde(default)]
    pub slaves: Vec<String>,
}

/// The supported layer kinds.
///
/// `gaurdian` keeps its historical misspelling: configs in the wild still use
/// it for the single-shard master+slaves redis layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LayerKind {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "fastmemory")]
    FastMemory,
    #[serde(rename = "tiny")]
    Tiny,
    #[serde(rename = "redis")]
    Redis,
    #[serde(rename = "rediscluster")]
    RedisCluster,
    #[serde(rename = "gaurdian")]
    Guardian,
}
