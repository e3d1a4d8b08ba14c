//! CacheRegistry: named bounded caches shared across a process

use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::RwLock;
use tracing::info;

use crate::bounded::BoundedCache;
use crate::cacheable::Cacheable;
use crate::config::CacheConfig;
use crate::scope::AttributeScope;

/// Name of the cache returned by [`CacheRegistry::main`]
pub const MAIN_CACHE: &str = "pipecache.main";

/// Registry of named bounded caches, created on first use
///
/// Built once at startup and handed to whatever needs a cache. Sizes come
/// from the [`CacheConfig`] it was built with.
pub struct CacheRegistry<V: ?Sized> {
    /// Sizes for caches created later
    config: CacheConfig,

    /// Caches created so far
    caches: RwLock<HashMap<String, Arc<BoundedCache<V>>, RandomState>>,
}

impl<V: ?Sized + Cacheable> CacheRegistry<V> {
    /// Create a registry using default sizes
    pub fn new() -> Self {
        Self::from_config(CacheConfig::default())
    }

    /// Create a registry sized by `config`
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            caches: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Get the cache called `name`, creating it if needed
    ///
    /// # Arguments
    /// * `name` - Cache name, looked up in the configuration for its size
    ///
    /// # Returns
    /// * `Arc<BoundedCache<V>>` - The one cache with that name
    pub fn cache(&self, name: &str) -> Arc<BoundedCache<V>> {
        self.cache_with_default(name, self.config.default_size)
    }

    /// Get the cache called `name`, sized `default_size` unless configured
    pub fn cache_with_default(&self, name: &str, default_size: usize) -> Arc<BoundedCache<V>> {
        if let Some(cache) = self.caches.read().get(name) {
            return Arc::clone(cache);
        }

        let mut caches = self.caches.write();
        let cache = caches.entry(name.to_string()).or_insert_with(|| {
            let size = self.config.size_for_or(name, default_size);
            info!(cache = name, size, "created cache");
            Arc::new(BoundedCache::new(name, size))
        });
        Arc::clone(cache)
    }

    /// The main pipeline cache
    pub fn main(&self) -> Arc<BoundedCache<V>> {
        self.cache(MAIN_CACHE)
    }

    /// Change the capacity of the cache called `name`, creating it if needed
    pub fn resize(&self, scope: &dyn AttributeScope, name: &str, max_size: usize) {
        self.cache(name).set_max_size(scope, max_size);
    }

    /// Empty every cache, returning how many entries were evicted
    pub fn remove_all(&self, scope: &dyn AttributeScope) -> usize {
        let caches: Vec<_> = self.caches.read().values().cloned().collect();
        caches.iter().map(|cache| cache.remove_all(scope)).sum()
    }
}

impl<V: ?Sized + Cacheable> Default for CacheRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: ?Sized> CacheRegistry<V> {
    /// Names of the caches created so far, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Configuration the registry was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}
