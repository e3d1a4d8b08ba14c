//! Payload notifications
//!
//! A payload stored in a [`BoundedCache`](crate::BoundedCache) is told when
//! it enters the cache and when it leaves it, so it can release whatever it
//! holds on to. All hooks default to no-ops.

use crate::scope::AttributeScope;

/// Why a payload left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    /// Pushed out by capacity pressure
    Capacity,
    /// Removed explicitly, or taken by the caller
    Removed,
    /// Dropped by a whole-cache clear
    Cleared,
}

/// Notification capability of a cached payload
pub trait Cacheable {
    /// Called once when the payload is admitted under a new key
    fn added(&self) {}

    /// Called exactly once when the payload leaves the cache
    ///
    /// Runs on the caller's thread after the cache lock is released.
    fn evicted(&self, _scope: &dyn AttributeScope, _cause: EvictionCause) {}
}

impl Cacheable for String {}
impl Cacheable for str {}
impl Cacheable for Vec<u8> {}
impl Cacheable for [u8] {}
