//! Cache error types

use redis::RedisError;

/// Cache-related errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Nothing found at any layer. A domain outcome, not a fault.
    #[error("cache miss")]
    Miss,

    /// Synthetic miss injected by the amnesia fault injector. Callers outside
    /// the layer stack only ever see [`CacheError::Miss`].
    #[error("amnesia miss ({chance}% chance)")]
    Amnesia { chance: u8 },

    #[error("redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("failed to encode cache payload: {0}")]
    Encode(String),

    #[error("failed to decode cache payload: {0}")]
    Decode(String),

    /// An envelope was present but its payload was null.
    #[error("nil object found in cache")]
    NilFound,

    /// `set` was called with a value that serializes to JSON null.
    #[error("cannot cache a null value")]
    NilValue,

    #[error("no cache layer named {0}")]
    LayerNotFound(String),

    #[error("invalid cache configuration: {0}")]
    Config(String),

    /// Aggregate of per-layer failures from a write or delete fan-out,
    /// messages joined with `;`.
    #[error("{0}")]
    Layers(String),
}

impl CacheError {
    /// True for both the ordinary and the injected miss.
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss | CacheError::Amnesia { .. })
    }
}
