//! Reclaimer: host-driven invalidation of reclaimable payloads
//!
//! Entries demoted out of a tiered cache's hot tier keep their payload in a
//! [`ReclaimCell`]. The cache holds the cell, but a [`Reclaimer`] may empty
//! it at any moment, from any thread, without taking the cache's lock. When
//! it does, the cell posts its sequence number on the owning cache's queue
//! and the cache sweeps the entry on its next operation.
//!
//! The host decides when memory is tight and calls [`Reclaimer::reclaim`].

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::debug;

/// Payload holder whose contents the reclaimer may take away
pub(crate) struct ReclaimCell<V: ?Sized> {
    seq: u64,
    payload: Mutex<Option<Arc<V>>>,
    notify: Sender<u64>,
}

impl<V: ?Sized> ReclaimCell<V> {
    pub(crate) fn new(seq: u64, payload: Arc<V>, notify: Sender<u64>) -> Self {
        Self {
            seq,
            payload: Mutex::new(Some(payload)),
            notify,
        }
    }

    /// Current payload, `None` once reclaimed
    pub(crate) fn get(&self) -> Option<Arc<V>> {
        self.payload.lock().clone()
    }

    /// Take the payload out so the reclaimer can no longer drop it
    pub(crate) fn take(&self) -> Option<Arc<V>> {
        self.payload.lock().take()
    }

    pub(crate) fn is_live(&self) -> bool {
        self.payload.lock().is_some()
    }
}

pub(crate) trait Reclaim: Send + Sync {
    /// Drop the payload and notify the owner; false if already empty
    fn reclaim(&self) -> bool;
}

impl<V: ?Sized + Send + Sync> Reclaim for ReclaimCell<V> {
    fn reclaim(&self) -> bool {
        let taken = self.payload.lock().take();
        match taken {
            Some(payload) => {
                drop(payload);
                // The owning cache may be gone already
                let _ = self.notify.send(self.seq);
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct Tracked {
    cells: VecDeque<Weak<dyn Reclaim>>,
    live_after_prune: usize,
}

impl Tracked {
    const MIN_PRUNE_LEN: usize = 32;

    fn prune(&mut self) {
        self.cells.retain(|cell| cell.strong_count() > 0);
        self.live_after_prune = self.cells.len();
    }
}

/// Handle to the memory manager side of reclaimable tiers
///
/// Cloning shares the same set of tracked cells, so one reclaimer can serve
/// several caches. Cells are reclaimed oldest first.
#[derive(Clone, Default)]
pub struct Reclaimer {
    tracked: Arc<Mutex<Tracked>>,
}

impl Reclaimer {
    /// Create a reclaimer tracking nothing
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn track(&self, cell: Weak<dyn Reclaim>) {
        let mut tracked = self.tracked.lock();
        tracked.cells.push_back(cell);
        let threshold = tracked.live_after_prune.max(Tracked::MIN_PRUNE_LEN) * 2;
        if tracked.cells.len() > threshold {
            tracked.prune();
        }
    }

    /// Reclaim up to `max` of the oldest live payloads
    ///
    /// Returns how many payloads were dropped.
    pub fn reclaim(&self, max: usize) -> usize {
        let mut tracked = self.tracked.lock();
        let mut reclaimed = 0;
        while reclaimed < max {
            let Some(cell) = tracked.cells.pop_front() else {
                break;
            };
            if let Some(cell) = cell.upgrade() {
                if cell.reclaim() {
                    reclaimed += 1;
                }
            }
        }
        if reclaimed > 0 {
            debug!(reclaimed, "reclaimed payloads");
        }
        reclaimed
    }

    /// Reclaim every live payload
    pub fn reclaim_all(&self) -> usize {
        self.reclaim(usize::MAX)
    }

    /// Number of cells that still exist
    pub fn tracked(&self) -> usize {
        let mut tracked = self.tracked.lock();
        tracked.prune();
        tracked.cells.len()
    }
}
