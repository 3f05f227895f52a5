//! tiercache - Multi-tier cache coordinator
//!
//! A named cache instance is an ordered stack of cache layers (fast local,
//! slower local, remote shared) behind a single key/value API:
//! - Read-through with asynchronous back-fill of shallower layers on a deep hit
//! - Write and delete fan-out to every layer, with aggregated errors
//! - Two-tier freshness: per-layer hard TTLs plus an advisory instance-level
//!   soft TTL with hot/warm/cold classification
//! - Cross-layer reconciliation that converges diverged layers on the newest
//!   envelope
//! - Probabilistic "amnesia" pseudo-misses for cache degradation experiments
//!
//! Layer kinds: bounded in-memory, unbounded fast-memory, an always-miss
//! `tiny` sentinel, single-node redis, and a keyspace-sharded redis layer
//! with master+slaves shards.

mod amnesia;
mod config;
mod error;
mod fastmemory;
mod instance;
mod layer;
mod memory;
mod observer;
mod payload;
mod redis_backend;
mod redis_cluster;
mod registry;
mod tiny;

pub use config::{CacheConfig, InstanceConfig, LayerConfig, LayerKind, ShardConfig};
pub use error::CacheError;
pub use fastmemory::FastMemoryLayer;
pub use instance::CacheInstance;
pub use layer::CacheLayer;
pub use memory::InMemoryLayer;
pub use observer::{DummyCounter, DummyTimer, HitCounter, LatencyTimer};
pub use payload::{decode_payload, encode_payload, Envelope, StoredEnvelope};
pub use redis_backend::RedisLayer;
pub use redis_cluster::ShardedRedisLayer;
pub use registry::CacheRegistry;
pub use tiny::TinyLayer;

// Re-export async_trait for implementing CacheLayer downstream
pub use async_trait::async_trait;
