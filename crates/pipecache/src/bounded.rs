//! BoundedCache: single-tier LRU cache keyed by structural keys
//!
//! Every entry carries the validity it was computed under. Lookups state the
//! validity they need and only hit when it is lower or equal to the stored
//! one. Capacity is strict: admitting a new key into a full cache evicts the
//! least recently used entry first.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::Mutex;
use tracing::debug;

use crate::cacheable::{Cacheable, EvictionCause};
use crate::key::Key;
use crate::recency::{NodeHandle, RecencyList};
use crate::scope::AttributeScope;
use crate::stats::CacheStats;
use crate::validity::Validity;

struct CacheEntry<V: ?Sized> {
    key: Key,
    validity: Validity,
    payload: Arc<V>,
}

struct BoundedState<V: ?Sized> {
    index: HashMap<Key, NodeHandle, RandomState>,
    recency: RecencyList<CacheEntry<V>>,
    max_size: usize,
}

impl<V: ?Sized> BoundedState<V> {
    fn evict_lru(&mut self) -> Option<CacheEntry<V>> {
        let entry = self.recency.pop_back()?;
        self.index.remove(&entry.key);
        Some(entry)
    }

    fn detach(&mut self, key: &Key) -> Option<CacheEntry<V>> {
        let handle = self.index.remove(key)?;
        self.recency.remove(handle)
    }

    fn valid_handle(&self, key: &Key, requested: &Validity) -> Option<NodeHandle> {
        let handle = *self.index.get(key)?;
        let entry = self.recency.get(handle)?;
        requested.lower_or_equal(&entry.validity).then_some(handle)
    }
}

/// Strict-capacity LRU cache of validity-stamped payloads
pub struct BoundedCache<V: ?Sized> {
    /// Name under which statistics are materialized
    name: String,

    /// Index, recency list and capacity, one lock for the whole instance
    state: Mutex<BoundedState<V>>,

    /// Counters over the cache's whole lifetime
    stats: CacheStats,
}

impl<V: ?Sized + Cacheable> BoundedCache<V> {
    /// Create a cache holding at most `max_size` entries
    ///
    /// A cache of size zero ignores every `add`.
    pub fn new(name: impl Into<String>, max_size: usize) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(BoundedState {
                index: HashMap::with_capacity_and_hasher(max_size.min(1024), RandomState::new()),
                recency: RecencyList::new(),
                max_size,
            }),
            stats: CacheStats::new(),
        }
    }

    /// Store `payload` under `key`, stamped with `validity`
    ///
    /// An existing entry is updated in place and becomes most recent. A new
    /// key admitted into a full cache first evicts the least recent entry.
    pub fn add(&self, scope: &dyn AttributeScope, key: Key, validity: Validity, payload: Arc<V>) {
        let mut evicted = None;
        let mut admitted = None;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.max_size == 0 {
                return;
            }

            if let Some(&handle) = state.index.get(&key) {
                if let Some(entry) = state.recency.get_mut(handle) {
                    entry.validity = validity;
                    entry.payload = payload;
                }
                state.recency.move_to_front(handle);
                debug!(cache = %self.name, key = %key, "updated entry");
            } else {
                if state.index.len() >= state.max_size {
                    evicted = state.evict_lru();
                }
                admitted = Some(Arc::clone(&payload));
                debug!(cache = %self.name, key = %key, "added entry");
                let handle = state.recency.push_front(CacheEntry {
                    key: key.clone(),
                    validity,
                    payload,
                });
                state.index.insert(key, handle);
            }
        }

        self.record(scope, CacheStats::record_add);
        if let Some(entry) = evicted {
            debug!(cache = %self.name, key = %entry.key, "evicted entry");
            self.record(scope, CacheStats::record_eviction);
            entry.payload.evicted(scope, EvictionCause::Capacity);
        }
        if let Some(payload) = admitted {
            payload.added();
        }
    }

    /// Remove the entry for `key`, returning whether one was present
    pub fn remove(&self, scope: &dyn AttributeScope, key: &Key) -> bool {
        let removed = self.state.lock().detach(key);
        match removed {
            Some(entry) => {
                entry.payload.evicted(scope, EvictionCause::Removed);
                true
            }
            None => false,
        }
    }

    /// Remove every entry, returning how many there were
    pub fn remove_all(&self, scope: &dyn AttributeScope) -> usize {
        let entries = {
            let mut state = self.state.lock();
            state.index.clear();
            state.recency.drain()
        };

        let count = entries.len();
        debug!(cache = %self.name, count, "removed all entries");
        for entry in entries {
            entry.payload.evicted(scope, EvictionCause::Cleared);
        }
        count
    }

    /// Payload for `key` if it was stored with a validity the request accepts
    ///
    /// A hit makes the entry most recent. A stale entry is left untouched.
    pub fn find_valid(
        &self,
        scope: &dyn AttributeScope,
        key: &Key,
        requested: &Validity,
    ) -> Option<Arc<V>> {
        let found = {
            let mut state = self.state.lock();
            state.valid_handle(key, requested).and_then(|handle| {
                state.recency.move_to_front(handle);
                state.recency.get(handle).map(|entry| Arc::clone(&entry.payload))
            })
        };

        if found.is_some() {
            self.record(scope, CacheStats::record_hit);
        } else {
            self.record(scope, CacheStats::record_miss);
        }
        found
    }

    /// Like [`find_valid`](Self::find_valid), but a hit removes the entry
    pub fn take_valid(
        &self,
        scope: &dyn AttributeScope,
        key: &Key,
        requested: &Validity,
    ) -> Option<Arc<V>> {
        let taken = {
            let mut state = self.state.lock();
            state
                .valid_handle(key, requested)
                .and_then(|_| state.detach(key))
        };

        match taken {
            Some(entry) => {
                self.record(scope, CacheStats::record_hit);
                entry.payload.evicted(scope, EvictionCause::Removed);
                Some(entry.payload)
            }
            None => {
                self.record(scope, CacheStats::record_miss);
                None
            }
        }
    }

    /// Peek at an entry regardless of validity
    ///
    /// Does not touch recency or statistics.
    pub fn find_any(&self, key: &Key) -> Option<(Validity, Arc<V>)> {
        let state = self.state.lock();
        let handle = *state.index.get(key)?;
        state
            .recency
            .get(handle)
            .map(|entry| (entry.validity.clone(), Arc::clone(&entry.payload)))
    }

    /// Change the capacity, evicting least recent entries when shrinking
    pub fn set_max_size(&self, scope: &dyn AttributeScope, max_size: usize) {
        let evicted = {
            let mut state = self.state.lock();
            let mut evicted = Vec::new();
            while state.index.len() > max_size {
                match state.evict_lru() {
                    Some(entry) => evicted.push(entry),
                    None => break,
                }
            }
            state.max_size = max_size;
            evicted
        };

        if !evicted.is_empty() {
            debug!(cache = %self.name, max_size, evicted = evicted.len(), "shrunk cache");
        }
        for entry in evicted {
            self.record(scope, CacheStats::record_eviction);
            entry.payload.evicted(scope, EvictionCause::Capacity);
        }
    }
}

impl<V: ?Sized> BoundedCache<V> {
    /// Cache name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current capacity
    pub fn max_size(&self) -> usize {
        self.state.lock().max_size
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().index.is_empty()
    }

    /// Keys, most recent first
    pub fn keys(&self) -> Vec<Key> {
        let state = self.state.lock();
        state.recency.iter().map(|entry| entry.key.clone()).collect()
    }

    /// Payloads, most recent first
    pub fn payloads(&self) -> Vec<Arc<V>> {
        let state = self.state.lock();
        state
            .recency
            .iter()
            .map(|entry| Arc::clone(&entry.payload))
            .collect()
    }

    /// Human-readable listing of the entries, most recent first
    pub fn dump(&self) -> String {
        let state = self.state.lock();
        let mut out = format!(
            "-- {} ({}/{}) --\n",
            self.name,
            state.index.len(),
            state.max_size
        );
        for (i, entry) in state.recency.iter().enumerate() {
            let _ = writeln!(out, "[{}] {} @ {}", i, entry.key, entry.validity);
        }
        out
    }

    /// Counters materialized in `scope`
    pub fn statistics(&self, scope: &dyn AttributeScope) -> Arc<CacheStats> {
        CacheStats::in_scope(scope, &self.name)
    }

    /// Counters over the cache's whole lifetime
    pub fn lifetime_stats(&self) -> &CacheStats {
        &self.stats
    }

    fn record(&self, scope: &dyn AttributeScope, record: fn(&CacheStats)) {
        record(&self.stats);
        record(&CacheStats::in_scope(scope, &self.name));
    }
}
