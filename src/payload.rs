//! Payload envelope and codec
//!
//! Every layer stores the same unit: a timestamped envelope around the
//! caller's value, JSON-encoded and optionally zlib-compressed. Two in-process
//! shapes exist. The write shape ([`Envelope`]) carries the live value on its
//! way into the stack; the read shape ([`StoredEnvelope`]) keeps the payload
//! as an opaque JSON fragment so the coordinator can inspect the timestamp
//! without knowing the payload schema. The coordinator converts between them
//! at the layer boundary.

use std::io::{Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::CacheError;

/// Write shape: a freshly produced value with its production timestamp.
///
/// The timestamp is set exactly once, here; back-fill and deep sync propagate
/// it unchanged.
#[derive(Debug, Serialize)]
pub struct Envelope<'a, T: Serialize> {
    #[serde(rename = "Time")]
    pub time: DateTime<Utc>,
    #[serde(rename = "CachedObject")]
    pub cached_object: &'a T,
}

/// Read shape: an envelope as it comes back out of a layer, payload still
/// encoded.
///
/// `CahcedObject` is accepted on input so entries written by old revisions
/// with the misspelled field stay readable; output always uses the canonical
/// spelling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEnvelope {
    #[serde(rename = "Time")]
    pub time: DateTime<Utc>,
    #[serde(rename = "CachedObject", alias = "CahcedObject", default)]
    pub cached_object: Option<Box<RawValue>>,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    /// Wrap `value` with the current wall-clock instant.
    pub fn now(value: &'a T) -> Self {
        Self {
            time: Utc::now(),
            cached_object: value,
        }
    }

    /// Serialize the live value into the fragment form layers store.
    ///
    /// Serialize impls of rich caller types have been observed to panic; the
    /// guard turns that into an encode error instead of unwinding through the
    /// coordinator.
    pub fn into_stored(self) -> Result<StoredEnvelope, CacheError> {
        let raw = catch_unwind(AssertUnwindSafe(|| {
            serde_json::value::to_raw_value(self.cached_object)
        }))
        .map_err(|panic| {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            CacheError::Encode(format!("panic while marshalling value: {msg}"))
        })?
        .map_err(|e| CacheError::Encode(e.to_string()))?;

        Ok(StoredEnvelope {
            time: self.time,
            cached_object: Some(raw),
        })
    }
}

impl StoredEnvelope {
    /// Whether the payload fragment is missing or JSON null.
    pub fn is_nil(&self) -> bool {
        match &self.cached_object {
            None => true,
            Some(raw) => raw.get() == "null",
        }
    }

    /// Decode the payload fragment into a typed value.
    pub fn decode_into<T: serde::de::DeserializeOwned>(&self) -> Result<T, CacheError> {
        let raw = match &self.cached_object {
            Some(raw) if raw.get() != "null" => raw,
            _ => return Err(CacheError::NilFound),
        };
        serde_json::from_str(raw.get()).map_err(|e| CacheError::Decode(e.to_string()))
    }
}

/// Serialize an envelope to its on-wire bytes, optionally zlib-wrapped.
pub fn encode_payload(envelope: &StoredEnvelope, compress: bool) -> Result<Vec<u8>, CacheError> {
    let raw = serde_json::to_vec(envelope).map_err(|e| CacheError::Encode(e.to_string()))?;
    if compress {
        compress_zlib(&raw)
    } else {
        Ok(raw)
    }
}

/// Parse on-wire bytes back into the read shape, leaving the payload opaque.
pub fn decode_payload(bytes: &[u8], compress: bool) -> Result<StoredEnvelope, CacheError> {
    let plain;
    let json = if compress {
        plain = decompress_zlib(bytes)?;
        plain.as_slice()
    } else {
        bytes
    };
    serde_json::from_slice(json).map_err(|e| CacheError::Decode(e.to_string()))
}

fn compress_zlib(input: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(input)
        .and_then(|_| encoder.finish())
        .map_err(|e| CacheError::Encode(e.to_string()))
}

fn decompress_zlib(input: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut out = Vec::new();
    ZlibDecoder::new(input)
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Decode(e.to_string()))?;
    Ok(out)
}
