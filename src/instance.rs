//! Cache instance coordinator
//!
//! One named instance owns an ordered layer stack and presents a single
//! key/value API over it. Reads walk the stack shallow-to-deep and back-fill
//! shallower layers after a deep hit; writes and deletes fan out to every
//! layer without short-circuiting; the instance-level soft TTL classifies
//! payload freshness without evicting anything.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::layer::CacheLayer;
use crate::observer::{counter_or_dummy, HitCounter};
use crate::payload::{Envelope, StoredEnvelope};
use crate::CacheError;

/// Detached back-fill and sync writes run under their own deadline,
/// independent of the caller that triggered them.
const BACKFILL_DEADLINE: Duration = Duration::from_secs(60);

/// A named multi-layer cache instance.
#[derive(Debug)]
pub struct CacheInstance {
    name: String,
    soft_ttl: Duration,
    layers: Vec<Arc<dyn CacheLayer>>,
    watcher: Arc<dyn HitCounter>,
}

impl CacheInstance {
    /// Assemble an instance from an already-built layer stack, shallowest
    /// layer first. Passing no counter substitutes the no-op one.
    pub fn new(
        name: impl Into<String>,
        soft_ttl: Duration,
        layers: Vec<Arc<dyn CacheLayer>>,
        watcher: Option<Arc<dyn HitCounter>>,
    ) -> Self {
        Self {
            name: name.into(),
            soft_ttl,
            layers,
            watcher: counter_or_dummy(watcher),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Walk the stack until the first hit; back-fill runs detached.
    async fn fetch(&self, key: &str) -> Result<StoredEnvelope, CacheError> {
        for (i, layer) in self.layers.iter().enumerate() {
            match layer.get(key).await {
                Ok(Some(envelope)) => {
                    self.spawn_backfill(key, envelope.clone(), i);
                    return Ok(envelope);
                }
                Ok(None) => {}
                Err(e) if e.is_miss() => {
                    debug!(layer = layer.name(), key, "amnesia miss");
                }
                Err(e) => {
                    warn!(
                        layer = layer.name(),
                        key,
                        error = %e,
                        "layer read failed, trying the next layer"
                    );
                }
            }
        }
        self.spawn_count(self.name.clone(), "miss");
        Err(CacheError::Miss)
    }

    /// Consult every layer and reconcile: the envelope with the latest
    /// timestamp wins and is written back to every absent or older layer.
    async fn fetch_and_sync(&self, key: &str) -> Result<StoredEnvelope, CacheError> {
        let replies = join_all(self.layers.iter().map(|layer| layer.get(key))).await;
        let found: Vec<Option<StoredEnvelope>> = replies
            .into_iter()
            .map(|reply| reply.ok().flatten())
            .collect();

        let mut winner: Option<(usize, StoredEnvelope)> = None;
        for (i, envelope) in found.iter().enumerate() {
            if let Some(envelope) = envelope {
                let newer = winner
                    .as_ref()
                    .is_none_or(|(_, best)| envelope.time > best.time);
                if newer {
                    winner = Some((i, envelope.clone()));
                }
            }
        }
        let Some((winner_index, winner)) = winner else {
            self.spawn_count(self.name.clone(), "miss");
            return Err(CacheError::Miss);
        };

        for (i, envelope) in found.iter().enumerate() {
            let stale = match envelope {
                None => true,
                Some(envelope) => envelope.time < winner.time,
            };
            if stale {
                let layer = Arc::clone(&self.layers[i]);
                let key = key.to_owned();
                let envelope = winner.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(BACKFILL_DEADLINE, layer.set(&key, &envelope)).await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!(layer = layer.name(), key = %key, error = %e, "failed to sync layer")
                        }
                        Err(_) => error!(layer = layer.name(), key = %key, "layer sync timed out"),
                    }
                });
            }
        }

        self.spawn_count(self.name.clone(), format!("layer{winner_index}"));
        Ok(winner)
    }

    fn spawn_backfill(&self, key: &str, envelope: StoredEnvelope, hit_layer: usize) {
        let layers: Vec<Arc<dyn CacheLayer>> = self.layers[..hit_layer].to_vec();
        let key = key.to_owned();
        let watcher = Arc::clone(&self.watcher);
        let name = self.name.clone();
        tokio::spawn(async move {
            let fill = async {
                for layer in layers.iter().rev() {
                    if let Err(e) = layer.set(&key, &envelope).await {
                        error!(layer = layer.name(), key = %key, error = %e, "failed to back-fill layer");
                    }
                }
            };
            if tokio::time::timeout(BACKFILL_DEADLINE, fill).await.is_err() {
                error!(key = %key, "back-fill timed out");
            }
            watcher.inc(&name, &format!("layer{hit_layer}"));
        });
    }

    fn spawn_count(&self, instance: String, label: impl Into<String>) {
        let watcher = Arc::clone(&self.watcher);
        let label = label.into();
        tokio::spawn(async move {
            watcher.inc(&instance, &label);
        });
    }

    fn age_of(&self, envelope: &StoredEnvelope) -> Duration {
        (Utc::now() - envelope.time).to_std().unwrap_or(Duration::ZERO)
    }

    fn checked(&self, key: &str, envelope: StoredEnvelope) -> Result<StoredEnvelope, CacheError> {
        if envelope.is_nil() {
            error!(key, instance = %self.name, "nil object found in cache");
            return Err(CacheError::NilFound);
        }
        Ok(envelope)
    }

    /// Retrieve the value stored under `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let envelope = self.fetch(key).await?;
        self.checked(key, envelope)?.decode_into()
    }

    /// Retrieve the value and report whether its soft TTL has passed.
    ///
    /// Also classifies the payload age into hot/warm/cold hotness buckets on
    /// the `{instance}-hotness` counter.
    pub async fn get_and_should_update<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<(T, bool), CacheError> {
        let envelope = self.fetch(key).await?;
        let envelope = self.checked(key, envelope)?;
        let value = envelope.decode_into()?;
        let age = self.age_of(&envelope);
        self.spawn_hotness(age);
        Ok((value, age > self.soft_ttl))
    }

    /// Report whether the soft TTL of `key` has passed, without decoding the
    /// payload.
    pub async fn should_update(&self, key: &str) -> Result<bool, CacheError> {
        let envelope = self.fetch(key).await?;
        let envelope = self.checked(key, envelope)?;
        Ok(self.age_of(&envelope) > self.soft_ttl)
    }

    /// Like [`should_update`](Self::should_update), but consults every layer
    /// and reconciles divergent timestamps while it is at it.
    pub async fn should_update_deep(&self, key: &str) -> Result<bool, CacheError> {
        let envelope = self.fetch_and_sync(key).await?;
        let envelope = self.checked(key, envelope)?;
        Ok(self.age_of(&envelope) > self.soft_ttl)
    }

    /// Store `value` under `key` in every layer.
    ///
    /// All layers are attempted even when one fails; failures come back as a
    /// single error with the per-layer messages joined by `;`.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let stored = Envelope::now(value).into_stored()?;
        if stored.is_nil() {
            return Err(CacheError::NilValue);
        }
        let mut failures = Vec::new();
        for layer in &self.layers {
            if let Err(e) = layer.set(key, &stored).await {
                failures.push(format!("{}: {e}", layer.name()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::Layers(failures.join(";")))
        }
    }

    /// Remove `key` from every layer, aggregating failures like
    /// [`set`](Self::set).
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut failures = Vec::new();
        for layer in &self.layers {
            if let Err(e) = layer.delete(key).await {
                failures.push(format!("{}: {e}", layer.name()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::Layers(failures.join(";")))
        }
    }

    /// The first layer holding `key` with remaining lifetime, as
    /// `(layer index, remaining)`; `None` when no layer reports one.
    pub async fn ttl(&self, key: &str) -> Option<(usize, Duration)> {
        for (i, layer) in self.layers.iter().enumerate() {
            let remaining = layer.ttl(key).await;
            if remaining > Duration::ZERO {
                return Some((i, remaining));
            }
        }
        None
    }

    /// Completely clear the named layer.
    pub async fn flush(&self, layer_name: &str) -> Result<(), CacheError> {
        for layer in &self.layers {
            if layer.name() == layer_name {
                return layer.clear().await;
            }
        }
        Err(CacheError::LayerNotFound(layer_name.to_owned()))
    }

    fn spawn_hotness(&self, age: Duration) {
        let watcher = Arc::clone(&self.watcher);
        let name = self.name.clone();
        let soft_ttl = self.soft_ttl;
        tokio::spawn(async move {
            let label = if age <= soft_ttl {
                "hot"
            } else if age <= soft_ttl * 2 {
                "warm"
            } else {
                "cold"
            };
            watcher.inc(&format!("{name}-hotness"), label);
        });
    }
}
