//! Cache statistics tracking

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::scope::{AttributeScope, AttributeValue};

/// Prefix of the scope attribute holding a cache's statistics
pub const STATISTICS_ATTRIBUTE_PREFIX: &str = "pipecache.statistics.";

/// Hit/miss/add/eviction counters
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    adds: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope attribute name for the cache called `cache_name`
    pub fn attribute_name(cache_name: &str) -> String {
        format!("{}{}", STATISTICS_ATTRIBUTE_PREFIX, cache_name)
    }

    /// Counters for `cache_name` in `scope`, created on first use
    ///
    /// If the scope already holds something else under that name, the
    /// counters are detached from the scope rather than overwriting it.
    pub fn in_scope(scope: &dyn AttributeScope, cache_name: &str) -> Arc<CacheStats> {
        let name = Self::attribute_name(cache_name);
        let value = scope.attribute_or_insert_with(&name, &mut || {
            Arc::new(CacheStats::new()) as AttributeValue
        });
        match value.downcast::<CacheStats>() {
            Ok(stats) => stats,
            Err(_) => {
                warn!(attribute = %name, "scope holds a foreign value under the statistics name");
                Arc::new(CacheStats::new())
            }
        }
    }

    /// Record a cache hit
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an add
    pub fn record_add(&self) {
        self.adds.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get total evictions
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get total adds
    pub fn adds(&self) -> u64 {
        self.adds.load(Ordering::Relaxed)
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.adds.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hits = self.hits();
        let misses = self.misses();
        write!(
            f,
            "hits: {}, misses: {}, adds: {}, evictions: {}, success rate: ",
            hits,
            misses,
            self.adds(),
            self.evictions()
        )?;
        if hits + misses > 0 {
            write!(f, "{}%", hits * 100 / (hits + misses))
        } else {
            write!(f, "N/A")
        }
    }
}

/// Snapshot of a tiered cache's occupancy and movement counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    /// Entries in the hot tier
    pub hot_size: usize,
    /// Entries in the reclaimable tier, including any not yet swept
    pub reclaimable_size: usize,
    /// Hot entries demoted to the reclaimable tier
    pub demoted: u64,
    /// Reclaimable entries promoted back to the hot tier
    pub promoted: u64,
    /// Reclaimable entries whose payload was reclaimed and swept
    pub reclaimed: u64,
}

impl TierStats {
    /// Field order used by [`fmt::Display`]
    pub const FORMAT: &'static str = "(hot, reclaimable, demoted, promoted, reclaimed)";
}

impl fmt::Display for TierStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}, {})",
            self.hot_size, self.reclaimable_size, self.demoted, self.promoted, self.reclaimed
        )
    }
}
