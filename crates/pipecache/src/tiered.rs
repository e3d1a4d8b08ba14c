//! TieredCache: a bounded hot tier backed by a reclaimable tier
//!
//! Entries are addressable through any of N key slots. The hot tier holds
//! payloads strongly and is capacity-bounded; when it is full, the globally
//! oldest hot entry is demoted into the reclaimable tier instead of being
//! dropped. Reclaimable payloads live in cells that a [`Reclaimer`] can
//! empty at any time. Every operation first sweeps entries whose payload was
//! reclaimed since the last call.
//!
//! Each tier orders its entries by a per-instance, strictly increasing
//! sequence number assigned on every (re)insertion, so the first entry of a
//! tier is its oldest.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Write as _};
use std::hash::Hash;
use std::sync::{Arc, Weak};

use ahash::RandomState;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::reclaim::{Reclaim, ReclaimCell, Reclaimer};
use crate::stats::TierStats;

/// Slot name used by [`TieredCache::single`]
pub const DEFAULT_SLOT: &str = "";

struct TierEntry<K, P> {
    keys: Arc<[K]>,
    payload: P,
}

struct Tier<K, P> {
    entries: BTreeMap<u64, TierEntry<K, P>>,
    slots: Vec<HashMap<K, u64, RandomState>>,
}

impl<K: Eq + Hash + Clone, P> Tier<K, P> {
    fn new(slot_count: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            slots: (0..slot_count)
                .map(|_| HashMap::with_hasher(RandomState::new()))
                .collect(),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn find(&self, slot: usize, key: &K) -> Option<u64> {
        self.slots[slot].get(key).copied()
    }

    fn get(&self, seq: u64) -> Option<&TierEntry<K, P>> {
        self.entries.get(&seq)
    }

    fn oldest(&self) -> Option<u64> {
        self.entries.keys().next().copied()
    }

    fn insert(&mut self, seq: u64, keys: Arc<[K]>, payload: P) {
        for (slot, key) in keys.iter().enumerate() {
            self.slots[slot].insert(key.clone(), seq);
        }
        self.entries.insert(seq, TierEntry { keys, payload });
    }

    /// Remove the entry with sequence `seq` from the tier and every slot index
    ///
    /// All slot indices must map the entry's keys back to `seq`; if one does
    /// not, nothing is removed.
    fn remove(&mut self, seq: u64) -> Result<Option<TierEntry<K, P>>> {
        let Some(entry) = self.entries.get(&seq) else {
            return Ok(None);
        };

        let disagreeing = entry
            .keys
            .iter()
            .enumerate()
            .find(|(slot, key)| self.slots[*slot].get(*key) != Some(&seq))
            .map(|(slot, _)| slot);
        if let Some(slot) = disagreeing {
            error!(slot, seq, "slot index disagrees with the entry being removed");
            return Err(Error::InconsistentIndex { slot });
        }

        let Some(entry) = self.entries.remove(&seq) else {
            return Ok(None);
        };
        for (slot, key) in entry.keys.iter().enumerate() {
            self.slots[slot].remove(key);
        }
        Ok(Some(entry))
    }

    fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        for index in &mut self.slots {
            index.clear();
        }
        count
    }

    fn iter(&self) -> impl Iterator<Item = &TierEntry<K, P>> {
        self.entries.values()
    }
}

enum Lookup<V: ?Sized> {
    Live(Arc<V>),
    Reclaimed,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Hot(u64),
    Reclaimable(u64),
}

struct TieredState<K, V: ?Sized> {
    hot: Tier<K, Arc<V>>,
    reclaimable: Tier<K, Arc<ReclaimCell<V>>>,
    max_hot: usize,
    max_reclaimable: Option<usize>,
    next_seq: u64,
    demoted: u64,
    promoted: u64,
    reclaimed: u64,
    reclaimer: Reclaimer,
    notifier: Sender<u64>,
    notices: Receiver<u64>,
}

impl<K, V> TieredState<K, V>
where
    K: Eq + Hash + Clone,
    V: ?Sized + Send + Sync + 'static,
{
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Drop entries the reclaimer has emptied since the last sweep
    fn sweep(&mut self) -> Result<()> {
        let mut swept = 0usize;
        while let Ok(seq) = self.notices.try_recv() {
            // Notices for entries promoted or removed in the meantime are stale
            if self.reclaimable.remove(seq)?.is_some() {
                swept += 1;
            }
        }
        if swept > 0 {
            self.reclaimed += swept as u64;
            let percent = swept * 100 / (self.reclaimable.len() + swept);
            info!(swept, percent, "removed reclaimed entries");
        }
        Ok(())
    }

    fn admit(&mut self, keys: Arc<[K]>, payload: Arc<V>) -> Result<()> {
        if self.max_hot == 0 {
            return self.admit_reclaimable(keys, payload);
        }
        self.check_limit()?;
        let seq = self.next_seq();
        self.hot.insert(seq, keys, payload);
        Ok(())
    }

    /// Demote oldest hot entries until there is room for one more
    fn check_limit(&mut self) -> Result<()> {
        if self.max_hot == 0 {
            return Ok(());
        }
        while self.hot.len() >= self.max_hot {
            let Some(seq) = self.hot.oldest() else {
                break;
            };
            let Some(entry) = self.hot.remove(seq)? else {
                break;
            };
            self.demoted += 1;
            debug!(seq, "demoted entry to reclaimable tier");
            self.admit_reclaimable(entry.keys, entry.payload)?;
        }
        Ok(())
    }

    fn admit_reclaimable(&mut self, keys: Arc<[K]>, payload: Arc<V>) -> Result<()> {
        let seq = self.next_seq();
        let cell = Arc::new(ReclaimCell::new(seq, payload, self.notifier.clone()));
        let erased: Arc<dyn Reclaim> = cell.clone();
        self.reclaimer.track(Arc::downgrade(&erased));
        self.reclaimable.insert(seq, keys, cell);

        if let Some(limit) = self.max_reclaimable {
            while self.reclaimable.len() > limit {
                let Some(oldest) = self.reclaimable.oldest() else {
                    break;
                };
                if let Some(entry) = self.reclaimable.remove(oldest)? {
                    entry.payload.take();
                    self.reclaimed += 1;
                    debug!(seq = oldest, "reclaimed entry over reclaimable limit");
                }
            }
        }
        Ok(())
    }

    /// Find an entry and reinsert it as the newest
    fn touch(&mut self, slot: usize, key: &K) -> Result<Lookup<V>> {
        if let Some(seq) = self.hot.find(slot, key) {
            if let Some(entry) = self.hot.remove(seq)? {
                let payload = Arc::clone(&entry.payload);
                self.admit(entry.keys, entry.payload)?;
                return Ok(Lookup::Live(payload));
            }
        }

        if let Some(seq) = self.reclaimable.find(slot, key) {
            if let Some(entry) = self.reclaimable.remove(seq)? {
                return match entry.payload.take() {
                    Some(payload) => {
                        if self.max_hot > 0 {
                            self.promoted += 1;
                            debug!(seq, "promoted entry to hot tier");
                        }
                        self.admit(entry.keys, Arc::clone(&payload))?;
                        Ok(Lookup::Live(payload))
                    }
                    None => {
                        self.reclaimed += 1;
                        Ok(Lookup::Reclaimed)
                    }
                };
            }
        }

        Ok(Lookup::Absent)
    }

    fn remove_at(&mut self, slot: usize, key: &K) -> Result<Lookup<V>> {
        if let Some(seq) = self.hot.find(slot, key) {
            if let Some(entry) = self.hot.remove(seq)? {
                return Ok(Lookup::Live(entry.payload));
            }
        }

        if let Some(seq) = self.reclaimable.find(slot, key) {
            if let Some(entry) = self.reclaimable.remove(seq)? {
                return match entry.payload.take() {
                    Some(payload) => Ok(Lookup::Live(payload)),
                    None => {
                        self.reclaimed += 1;
                        Ok(Lookup::Reclaimed)
                    }
                };
            }
        }

        Ok(Lookup::Absent)
    }

    /// Drop a reclaimed entry still indexed under `key`
    fn purge_reclaimed(&mut self, slot: usize, key: &K) -> Result<()> {
        let Some(seq) = self.reclaimable.find(slot, key) else {
            return Ok(());
        };
        let live = self
            .reclaimable
            .get(seq)
            .is_some_and(|entry| entry.payload.is_live());
        if !live && self.reclaimable.remove(seq)?.is_some() {
            self.reclaimed += 1;
        }
        Ok(())
    }

    fn locate(&self, slot: usize, key: &K) -> Option<Location> {
        self.hot
            .find(slot, key)
            .map(Location::Hot)
            .or_else(|| self.reclaimable.find(slot, key).map(Location::Reclaimable))
    }

    /// Whether a key past the first slot belongs to another live entry
    fn claimed_elsewhere(&self, keys: &[K]) -> bool {
        let target = self.locate(0, &keys[0]);
        keys.iter().enumerate().skip(1).any(|(slot, key)| {
            let hot = self.hot.find(slot, key).map(Location::Hot);
            let reclaimable = self
                .reclaimable
                .find(slot, key)
                .filter(|seq| {
                    self.reclaimable
                        .get(*seq)
                        .is_some_and(|entry| entry.payload.is_live())
                })
                .map(Location::Reclaimable);
            [hot, reclaimable]
                .into_iter()
                .flatten()
                .any(|found| Some(found) != target)
        })
    }

    fn contains_any(&self, keys: &[K]) -> bool {
        keys.iter().enumerate().any(|(slot, key)| {
            self.hot.find(slot, key).is_some() || self.reclaimable.find(slot, key).is_some()
        })
    }

    fn put_entry(&mut self, keys: Vec<K>, value: Arc<V>) -> Result<()>
    where
        K: fmt::Debug,
    {
        for (slot, key) in keys.iter().enumerate() {
            self.purge_reclaimed(slot, key)?;
        }
        if self.contains_any(&keys) {
            return Err(Error::AlreadyCached(format!("{:?}", keys)));
        }
        self.admit(Arc::from(keys), value)
    }
}

/// Two-tier cache addressable by several independent keys
pub struct TieredCache<K, V: ?Sized> {
    /// Slot names, in key order
    slots: Vec<String>,

    /// Both tiers and their counters, one lock for the whole instance
    state: Mutex<TieredState<K, V>>,
}

impl<K, V> TieredCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: ?Sized + Send + Sync + 'static,
{
    /// Create a cache whose entries are addressed by one key per slot name
    ///
    /// With `max_hot` zero, entries go straight to the reclaimable tier.
    pub fn new<S: AsRef<str>>(max_hot: usize, slot_names: &[S]) -> Result<Self> {
        Self::with_reclaimer(max_hot, slot_names, Reclaimer::new())
    }

    /// Create a cache whose reclaimable tier is driven by `reclaimer`
    pub fn with_reclaimer<S: AsRef<str>>(
        max_hot: usize,
        slot_names: &[S],
        reclaimer: Reclaimer,
    ) -> Result<Self> {
        if slot_names.is_empty() {
            return Err(Error::InvalidSlots("at least one slot is required".to_string()));
        }
        let mut seen = HashSet::new();
        for name in slot_names {
            if !seen.insert(name.as_ref()) {
                return Err(Error::InvalidSlots(format!(
                    "duplicate slot '{}'",
                    name.as_ref()
                )));
            }
        }

        let slots = slot_names.iter().map(|s| s.as_ref().to_string()).collect();
        Ok(Self::build(max_hot, slots, reclaimer))
    }

    /// Create a cache with the single slot [`DEFAULT_SLOT`]
    pub fn single(max_hot: usize) -> Self {
        Self::build(max_hot, vec![DEFAULT_SLOT.to_string()], Reclaimer::new())
    }

    fn build(max_hot: usize, slots: Vec<String>, reclaimer: Reclaimer) -> Self {
        let (notifier, notices) = unbounded();
        let slot_count = slots.len();
        Self {
            slots,
            state: Mutex::new(TieredState {
                hot: Tier::new(slot_count),
                reclaimable: Tier::new(slot_count),
                max_hot,
                max_reclaimable: None,
                next_seq: 0,
                demoted: 0,
                promoted: 0,
                reclaimed: 0,
                reclaimer,
                notifier,
                notices,
            }),
        }
    }

    /// Bound the reclaimable tier explicitly
    ///
    /// Past the bound, the oldest reclaimable entry is reclaimed on demotion.
    pub fn with_max_reclaimable(mut self, limit: Option<usize>) -> Self {
        self.state.get_mut().max_reclaimable = limit;
        self
    }

    /// Store `value` under one key per slot
    ///
    /// Fails if the key count is wrong or any key already has a live entry.
    pub fn put(&self, keys: Vec<K>, value: Arc<V>) -> Result<()> {
        self.check_slot_count(keys.len())?;
        let mut state = self.state.lock();
        state.sweep()?;
        state.put_entry(keys, value)
    }

    /// Look up `key` in `slot`, making the entry the newest if found
    pub fn get(&self, slot: &str, key: &K) -> Result<Option<Arc<V>>> {
        let slot = self.slot_index(slot)?;
        let mut state = self.state.lock();
        state.sweep()?;
        match state.touch(slot, key)? {
            Lookup::Live(payload) => Ok(Some(payload)),
            Lookup::Reclaimed | Lookup::Absent => Ok(None),
        }
    }

    /// Like [`get`](Self::get), but an absent entry is an error
    pub fn refresh(&self, slot: &str, key: &K) -> Result<Arc<V>> {
        let index = self.slot_index(slot)?;
        let mut state = self.state.lock();
        state.sweep()?;
        match state.touch(index, key)? {
            Lookup::Live(payload) => Ok(payload),
            Lookup::Reclaimed | Lookup::Absent => Err(not_found(slot, key)),
        }
    }

    /// Remove the entry for `key` in `slot` from whichever tier holds it
    ///
    /// Returns `None` if the entry was there but its payload was reclaimed.
    pub fn remove(&self, slot: &str, key: &K) -> Result<Option<Arc<V>>> {
        let index = self.slot_index(slot)?;
        let mut state = self.state.lock();
        state.sweep()?;
        match state.remove_at(index, key)? {
            Lookup::Live(payload) => Ok(Some(payload)),
            Lookup::Reclaimed => Ok(None),
            Lookup::Absent => Err(not_found(slot, key)),
        }
    }

    /// Replace the entry found through the first slot, returning the old value
    pub fn replace(&self, keys: Vec<K>, value: Arc<V>) -> Result<Option<Arc<V>>> {
        self.check_slot_count(keys.len())?;
        let mut state = self.state.lock();
        state.sweep()?;
        if state.claimed_elsewhere(&keys) {
            return Err(Error::AlreadyCached(format!("{:?}", keys)));
        }

        let previous = match state.remove_at(0, &keys[0])? {
            Lookup::Live(payload) => Some(payload),
            Lookup::Reclaimed | Lookup::Absent => None,
        };
        state.put_entry(keys, value)?;
        Ok(previous)
    }

    /// Empty both tiers, returning how many entries were removed
    pub fn flush(&self) -> usize {
        let mut state = self.state.lock();
        // Pending notices refer to entries about to be dropped
        while state.notices.try_recv().is_ok() {}
        let count = state.hot.clear() + state.reclaimable.clear();
        debug!(count, "flushed tiered cache");
        count
    }

    /// Iterate live payloads, hot tier first, oldest first within a tier
    ///
    /// Reclaimable payloads are resolved as the iterator reaches them, so
    /// ones reclaimed in the meantime are skipped.
    pub fn elements(&self) -> Elements<V> {
        let state = self.state.lock();
        let hot: Vec<Arc<V>> = state
            .hot
            .iter()
            .map(|entry| Arc::clone(&entry.payload))
            .collect();
        let reclaimable: Vec<Weak<ReclaimCell<V>>> = state
            .reclaimable
            .iter()
            .map(|entry| Arc::downgrade(&entry.payload))
            .collect();
        Elements {
            hot: hot.into_iter(),
            reclaimable: reclaimable.into_iter(),
        }
    }

    /// Keys of the reclaimable tier in `slot`, oldest first
    pub fn reclaimable_keys(&self, slot: &str) -> Result<Vec<K>> {
        let index = self.slot_index(slot)?;
        let mut state = self.state.lock();
        state.sweep()?;
        Ok(state
            .reclaimable
            .iter()
            .map(|entry| entry.keys[index].clone())
            .collect())
    }

    /// Change the hot tier's capacity
    ///
    /// Excess entries are demoted on the next admission.
    pub fn set_max_hot_size(&self, max_hot: usize) {
        self.state.lock().max_hot = max_hot;
    }

    /// Hot tier capacity
    pub fn max_hot_size(&self) -> usize {
        self.state.lock().max_hot
    }

    /// Slot names, in key order
    pub fn slot_names(&self) -> &[String] {
        &self.slots
    }

    /// Handle to the reclaimer driving this cache's reclaimable tier
    pub fn reclaimer(&self) -> Reclaimer {
        self.state.lock().reclaimer.clone()
    }

    /// Entries in both tiers, including reclaimed ones not yet swept
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.hot.len() + state.reclaimable.len()
    }

    /// Check if both tiers are empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupancy and movement counters
    pub fn stats(&self) -> TierStats {
        let state = self.state.lock();
        TierStats {
            hot_size: state.hot.len(),
            reclaimable_size: state.reclaimable.len(),
            demoted: state.demoted,
            promoted: state.promoted,
            reclaimed: state.reclaimed,
        }
    }

    /// Human-readable listing of live entries in both tiers, oldest first
    pub fn dump(&self) -> String {
        let state = self.state.lock();
        let mut out = format!("-- hot tier ({}/{}) --\n", state.hot.len(), state.max_hot);
        for (i, entry) in state.hot.iter().enumerate() {
            let _ = writeln!(out, "[{}] {}", i, self.describe_keys(&entry.keys));
        }
        let live: Vec<_> = state
            .reclaimable
            .iter()
            .filter(|entry| entry.payload.is_live())
            .collect();
        let _ = writeln!(out, "-- reclaimable tier ({}) --", live.len());
        for (i, entry) in live.iter().enumerate() {
            let _ = writeln!(out, "[{}] {}", i, self.describe_keys(&entry.keys));
        }
        out
    }

    fn describe_keys(&self, keys: &[K]) -> String {
        self.slots
            .iter()
            .zip(keys)
            .map(|(slot, key)| format!("{}={:?}", slot, key))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn slot_index(&self, slot: &str) -> Result<usize> {
        self.slots
            .iter()
            .position(|name| name == slot)
            .ok_or_else(|| Error::UnknownSlot(slot.to_string()))
    }

    fn check_slot_count(&self, actual: usize) -> Result<()> {
        if actual != self.slots.len() {
            return Err(Error::SlotCount {
                expected: self.slots.len(),
                actual,
            });
        }
        Ok(())
    }
}

fn not_found<K: fmt::Debug>(slot: &str, key: &K) -> Error {
    Error::NotFound(format!("slot '{}', key {:?}", slot, key))
}

/// Iterator returned by [`TieredCache::elements`]
pub struct Elements<V: ?Sized> {
    hot: std::vec::IntoIter<Arc<V>>,
    reclaimable: std::vec::IntoIter<Weak<ReclaimCell<V>>>,
}

impl<V: ?Sized> Iterator for Elements<V> {
    type Item = Arc<V>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(payload) = self.hot.next() {
            return Some(payload);
        }
        self.reclaimable
            .find_map(|cell| cell.upgrade().and_then(|cell| cell.get()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Sessions = TieredCache<String, String>;

    fn sessions(max_hot: usize) -> Sessions {
        TieredCache::new(max_hot, &["id", "path"]).unwrap()
    }

    fn keys(id: &str) -> Vec<String> {
        vec![id.to_string(), format!("/{}", id)]
    }

    fn value(s: &str) -> Arc<String> {
        Arc::new(s.to_string())
    }

    fn get(cache: &Sessions, slot: &str, key: &str) -> Option<String> {
        cache
            .get(slot, &key.to_string())
            .unwrap()
            .map(|v| v.to_string())
    }

    fn elements(cache: &Sessions) -> Vec<String> {
        cache.elements().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_round_trip_every_slot() {
        let cache = sessions(4);
        cache.put(keys("a"), value("A")).unwrap();

        assert_eq!(get(&cache, "id", "a").as_deref(), Some("A"));
        assert_eq!(get(&cache, "path", "/a").as_deref(), Some("A"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_argument_errors() {
        let cache = sessions(4);

        assert!(matches!(
            cache.put(vec!["a".to_string()], value("A")),
            Err(Error::SlotCount { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            cache.get("nope", &"a".to_string()),
            Err(Error::UnknownSlot(_))
        ));
        assert!(matches!(
            TieredCache::<String, String>::new(1, &["id", "id"]),
            Err(Error::InvalidSlots(_))
        ));
        let no_slots: [&str; 0] = [];
        assert!(matches!(
            TieredCache::<String, String>::new(1, &no_slots),
            Err(Error::InvalidSlots(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_duplicate_put() {
        let cache = sessions(4);
        cache.put(keys("a"), value("A")).unwrap();

        let clash = vec!["b".to_string(), "/a".to_string()];
        assert!(matches!(cache.put(clash, value("B")), Err(Error::AlreadyCached(_))));
        assert!(matches!(cache.put(keys("a"), value("A2")), Err(Error::AlreadyCached(_))));
        assert_eq!(get(&cache, "id", "a").as_deref(), Some("A"));
    }

    #[test]
    fn test_demotion_and_promotion() {
        let cache = sessions(2);
        cache.put(keys("a"), value("A")).unwrap();
        cache.put(keys("b"), value("B")).unwrap();
        cache.put(keys("c"), value("C")).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.demoted, 1);
        assert_eq!(stats.hot_size, 2);
        assert_eq!(stats.reclaimable_size, 1);
        assert_eq!(cache.reclaimable_keys("id").unwrap(), vec!["a".to_string()]);

        // The demoted value is still there and comes back hot
        assert_eq!(get(&cache, "path", "/a").as_deref(), Some("A"));
        let stats = cache.stats();
        assert_eq!(stats.promoted, 1);
        assert_eq!(stats.demoted, 2);
        assert_eq!(cache.reclaimable_keys("id").unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_get_refreshes_hot_order() {
        let cache = sessions(2);
        cache.put(keys("a"), value("A")).unwrap();
        cache.put(keys("b"), value("B")).unwrap();
        get(&cache, "id", "a");
        cache.put(keys("c"), value("C")).unwrap();

        // b was the oldest after a was touched
        assert_eq!(cache.reclaimable_keys("id").unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_zero_hot_capacity_and_reclamation() {
        let cache = sessions(0);
        cache.put(keys("k"), value("K")).unwrap();
        assert_eq!(cache.stats().reclaimable_size, 1);

        // Still reclaimable after a hit
        assert_eq!(get(&cache, "id", "k").as_deref(), Some("K"));
        assert_eq!(cache.stats().hot_size, 0);
        assert_eq!(cache.stats().promoted, 0);

        assert_eq!(cache.reclaimer().reclaim_all(), 1);
        assert_eq!(get(&cache, "id", "k"), None);
        assert_eq!(cache.stats().reclaimed, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_on_unrelated_operation() {
        let cache = sessions(0);
        cache.put(keys("a"), value("A")).unwrap();
        cache.put(keys("b"), value("B")).unwrap();

        assert_eq!(cache.reclaimer().reclaim(1), 1);
        assert_eq!(cache.len(), 2);

        assert_eq!(get(&cache, "id", "b").as_deref(), Some("B"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().reclaimed, 1);
    }

    #[test]
    fn test_put_over_reclaimed_entry() {
        let cache = sessions(0);
        cache.put(keys("a"), value("A")).unwrap();
        cache.reclaimer().reclaim_all();

        cache.put(keys("a"), value("A2")).unwrap();
        assert_eq!(get(&cache, "id", "a").as_deref(), Some("A2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove() {
        let cache = sessions(1);
        cache.put(keys("a"), value("A")).unwrap();
        cache.put(keys("b"), value("B")).unwrap();

        // a is reclaimable, b is hot
        assert_eq!(cache.remove("path", &"/a".to_string()).unwrap().as_deref(), Some(&"A".to_string()));
        assert_eq!(cache.remove("id", &"b".to_string()).unwrap().as_deref(), Some(&"B".to_string()));
        assert!(matches!(cache.remove("id", &"b".to_string()), Err(Error::NotFound(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_reclaimed() {
        let cache = sessions(0);
        cache.put(keys("a"), value("A")).unwrap();
        cache.reclaimer().reclaim_all();

        // Swept before the lookup runs
        assert!(matches!(cache.remove("id", &"a".to_string()), Err(Error::NotFound(_))));
        assert_eq!(cache.stats().reclaimed, 1);
    }

    #[test]
    fn test_refresh() {
        let cache = sessions(2);
        cache.put(keys("a"), value("A")).unwrap();

        assert_eq!(cache.refresh("id", &"a".to_string()).unwrap().as_str(), "A");
        assert!(matches!(
            cache.refresh("id", &"zz".to_string()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_replace() {
        let cache = sessions(2);

        assert_eq!(cache.replace(keys("a"), value("A1")).unwrap(), None);
        let previous = cache.replace(keys("a"), value("A2")).unwrap();
        assert_eq!(previous.as_deref().map(String::as_str), Some("A1"));
        assert_eq!(get(&cache, "path", "/a").as_deref(), Some("A2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_replace_rejects_key_of_another_entry() {
        let cache = sessions(2);
        cache.put(keys("a"), value("A")).unwrap();
        cache.put(keys("b"), value("B")).unwrap();

        let clash = vec!["a".to_string(), "/b".to_string()];
        assert!(matches!(cache.replace(clash, value("X")), Err(Error::AlreadyCached(_))));
        assert_eq!(get(&cache, "id", "a").as_deref(), Some("A"));
        assert_eq!(get(&cache, "path", "/a").as_deref(), Some("A"));
        assert_eq!(get(&cache, "path", "/b").as_deref(), Some("B"));

        // A fresh key in a later slot is fine
        let moved = vec!["a".to_string(), "/a2".to_string()];
        let previous = cache.replace(moved, value("A2")).unwrap();
        assert_eq!(previous.as_deref().map(String::as_str), Some("A"));
        assert_eq!(get(&cache, "path", "/a2").as_deref(), Some("A2"));
        assert_eq!(get(&cache, "path", "/a"), None);
    }

    #[test]
    fn test_flush() {
        let cache = sessions(1);
        assert_eq!(cache.flush(), 0);
        assert!(elements(&cache).is_empty());

        cache.put(keys("a"), value("A")).unwrap();
        cache.put(keys("b"), value("B")).unwrap();
        assert_eq!(cache.flush(), 2);
        assert_eq!(cache.flush(), 0);
        assert!(elements(&cache).is_empty());
        assert_eq!(get(&cache, "id", "a"), None);
    }

    #[test]
    fn test_elements_skip_reclaimed() {
        let cache = sessions(1);
        cache.put(keys("a"), value("A")).unwrap();
        cache.put(keys("b"), value("B")).unwrap();
        cache.put(keys("c"), value("C")).unwrap();

        // hot: c, reclaimable: a, b
        assert_eq!(elements(&cache), vec!["C", "A", "B"]);

        let mut iter = cache.elements();
        assert_eq!(iter.next().as_deref().map(String::as_str), Some("C"));
        cache.reclaimer().reclaim(1);
        assert_eq!(iter.next().as_deref().map(String::as_str), Some("B"));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_reclaimable_limit() {
        let cache = sessions(1).with_max_reclaimable(Some(1));
        cache.put(keys("a"), value("A")).unwrap();
        cache.put(keys("b"), value("B")).unwrap();
        cache.put(keys("c"), value("C")).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.reclaimable_size, 1);
        assert_eq!(stats.reclaimed, 1);
        assert_eq!(get(&cache, "id", "a"), None);
        assert_eq!(get(&cache, "id", "b").as_deref(), Some("B"));
    }

    #[test]
    fn test_shared_reclaimer() {
        let reclaimer = Reclaimer::new();
        let first: Sessions = TieredCache::with_reclaimer(0, &["id", "path"], reclaimer.clone()).unwrap();
        let second: Sessions = TieredCache::with_reclaimer(0, &["id", "path"], reclaimer.clone()).unwrap();
        first.put(keys("a"), value("A")).unwrap();
        second.put(keys("b"), value("B")).unwrap();

        assert_eq!(reclaimer.reclaim(1), 1);
        assert_eq!(get(&first, "id", "a"), None);
        assert_eq!(get(&second, "id", "b").as_deref(), Some("B"));
    }

    #[test]
    fn test_set_max_hot_size() {
        let cache = sessions(3);
        for id in ["a", "b", "c"] {
            cache.put(keys(id), value(id)).unwrap();
        }

        cache.set_max_hot_size(1);
        cache.put(keys("d"), value("d")).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hot_size, 1);
        assert_eq!(stats.reclaimable_size, 3);
        assert_eq!(stats.demoted, 3);
    }

    #[test]
    fn test_single_slot() {
        let cache: TieredCache<u64, str> = TieredCache::single(2);
        cache.put(vec![7], Arc::from("seven")).unwrap();

        assert_eq!(cache.get(DEFAULT_SLOT, &7).unwrap().as_deref(), Some("seven"));
        assert_eq!(cache.slot_names(), &[DEFAULT_SLOT.to_string()]);
    }

    #[test]
    fn test_dump() {
        let cache = sessions(1);
        cache.put(keys("a"), value("A")).unwrap();
        cache.put(keys("b"), value("B")).unwrap();

        assert_eq!(
            cache.dump(),
            "-- hot tier (1/1) --\n\
             [0] id=\"b\", path=\"/b\"\n\
             -- reclaimable tier (1) --\n\
             [0] id=\"a\", path=\"/a\"\n"
        );
    }

    #[test]
    fn test_stale_notice_is_ignored() {
        let cache = sessions(0);
        cache.put(keys("a"), value("A")).unwrap();

        // A notice for a sequence no longer in the tier
        cache.state.lock().notifier.send(42).unwrap();
        assert_eq!(get(&cache, "id", "a").as_deref(), Some("A"));
        assert_eq!(cache.stats().reclaimed, 0);
    }

    #[test]
    fn test_inconsistent_index_is_rejected() {
        let mut tier: Tier<String, u32> = Tier::new(2);
        tier.insert(1, Arc::from(keys("a")), 10);
        tier.slots[1].insert("/a".to_string(), 99);

        assert!(matches!(tier.remove(1), Err(Error::InconsistentIndex { slot: 1 })));
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.find(0, &"a".to_string()), Some(1));
    }

    #[test]
    fn test_hit_reissues_reclaim_cell() {
        let cache = sessions(0);
        cache.put(keys("a"), value("A")).unwrap();
        let reclaimer = cache.reclaimer();

        // The hit moves the payload into a fresh cell; the old one is dropped
        get(&cache, "id", "a");
        assert_eq!(reclaimer.tracked(), 1);
        assert_eq!(reclaimer.reclaim(1), 1);
        assert_eq!(get(&cache, "id", "a"), None);
        assert_eq!(cache.stats().reclaimed, 1);
    }

    /// Empty a reclaimable cell without posting a notice
    fn empty_cell_silently(cache: &Sessions, id: &str) {
        let state = cache.state.lock();
        let seq = state.reclaimable.find(0, &id.to_string()).unwrap();
        state.reclaimable.get(seq).unwrap().payload.take().unwrap();
    }

    #[test]
    fn test_unswept_reclaimed_entries_read_as_absent() {
        let cache = sessions(0);
        for id in ["a", "b", "c"] {
            cache.put(keys(id), value(id)).unwrap();
        }
        for id in ["a", "b", "c"] {
            empty_cell_silently(&cache, id);
        }

        assert!(cache.dump().ends_with("-- reclaimable tier (0) --\n"));
        assert!(elements(&cache).is_empty());

        assert_eq!(get(&cache, "path", "/a"), None);
        assert_eq!(cache.stats().reclaimed, 1);

        assert_eq!(cache.remove("id", &"b".to_string()).unwrap(), None);
        assert_eq!(cache.stats().reclaimed, 2);

        cache.put(keys("c"), value("C2")).unwrap();
        assert_eq!(cache.stats().reclaimed, 3);
        assert_eq!(get(&cache, "id", "c").as_deref(), Some("C2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_reclaim_from_another_thread() {
        let cache: Arc<TieredCache<u64, String>> =
            Arc::new(TieredCache::new(2, &["id", "path"]).unwrap());
        let reclaimer = cache.reclaimer();
        let worker = std::thread::spawn(move || {
            let mut total = 0;
            for _ in 0..2000 {
                total += reclaimer.reclaim(1);
                std::thread::yield_now();
            }
            total
        });

        for i in 0..2000u64 {
            let id = i % 16;
            match cache.get("id", &id).unwrap() {
                Some(found) => assert_eq!(*found, format!("v{}", id)),
                None => cache
                    .put(vec![id, id + 1000], Arc::new(format!("v{}", id)))
                    .unwrap(),
            }
            if i % 7 == 0 {
                match cache.remove("path", &(id + 1000)) {
                    Ok(Some(found)) => assert_eq!(*found, format!("v{}", id)),
                    Ok(None) | Err(Error::NotFound(_)) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
        }

        let total = worker.join().unwrap();
        // Any lookup sweeps the notices still queued
        assert_eq!(cache.get("id", &u64::MAX).unwrap(), None);
        assert_eq!(cache.stats().reclaimed, total as u64);
    }
}
