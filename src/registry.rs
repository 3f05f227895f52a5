//! Registry of named cache instances
//!
//! Built once from configuration at startup; every instance and its layers
//! are constructed eagerly so malformed configuration fails here instead of
//! during operation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::instance::CacheInstance;
use crate::layer::build_layer;
use crate::observer::{counter_or_dummy, timer_or_dummy, HitCounter, LatencyTimer};
use crate::CacheError;

/// Holds every configured cache instance by name.
#[derive(Debug)]
pub struct CacheRegistry {
    instances: HashMap<String, Arc<CacheInstance>>,
}

impl CacheRegistry {
    /// Build all instances described by `config`. Observers are optional;
    /// no-op implementations stand in when none are supplied.
    pub async fn new(
        config: &CacheConfig,
        timer: Option<Arc<dyn LatencyTimer>>,
        counter: Option<Arc<dyn HitCounter>>,
    ) -> Result<Self, CacheError> {
        let timer = timer_or_dummy(timer);
        let counter = counter_or_dummy(counter);

        let mut instances = HashMap::with_capacity(config.instances.len());
        for (name, instance_config) in &config.instances {
            let mut layers = Vec::with_capacity(instance_config.layers.len());
            for layer_name in &instance_config.layers {
                let layer_config = instance_config.layer(layer_name).ok_or_else(|| {
                    CacheError::Config(format!(
                        "instance {name}: layer {layer_name} is listed but not configured"
                    ))
                })?;
                layers.push(build_layer(layer_name, layer_config, Arc::clone(&timer)).await?);
            }
            let instance = CacheInstance::new(
                name.clone(),
                instance_config.soft_ttl,
                layers,
                Some(Arc::clone(&counter)),
            );
            instances.insert(name.clone(), Arc::new(instance));
        }
        Ok(Self { instances })
    }

    /// The instance registered under `name`.
    pub fn select(&self, name: &str) -> Option<Arc<CacheInstance>> {
        self.instances.get(name).cloned()
    }
}
