//! # pipecache
//!
//! In-process object cache for derived pipeline artifacts.
//!
//! ## Architecture
//! - **Keys**: structural identities built from a producer and its inputs,
//!   with a memoized hash
//! - **Validity**: partially ordered freshness tokens; a lookup hits only if
//!   the requested token is lower than or equal to the stored one
//! - **BoundedCache**: strict-capacity LRU over an index-backed recency list
//! - **TieredCache**: bounded hot tier that demotes into a reclaimable tier,
//!   addressable through several key slots
//! - **Reclaimer**: host-driven invalidation of reclaimable payloads
//! - **CacheRegistry**: named bounded caches sized from TOML configuration
//!
//! ```
//! use std::sync::Arc;
//! use pipecache::{BoundedCache, Key, PipelineScope, Validity};
//!
//! let cache: BoundedCache<str> = BoundedCache::new("fragments", 2);
//! let scope = PipelineScope::new();
//! let key = Key::leaf("xslt", "data", "page.xml").unwrap();
//!
//! cache.add(&scope, key.clone(), Validity::from(vec![5i64, 2]), Arc::from("<p/>"));
//! assert!(cache.find_valid(&scope, &key, &Validity::from(vec![5i64, 1])).is_some());
//! assert!(cache.find_valid(&scope, &key, &Validity::from(vec![6i64, 0])).is_none());
//! ```

#![warn(missing_docs)]

mod bounded;
mod cacheable;
mod config;
mod error;
mod key;
mod reclaim;
mod recency;
mod registry;
mod scope;
mod stats;
mod tiered;
mod validity;

pub use bounded::BoundedCache;
pub use cacheable::{Cacheable, EvictionCause};
pub use config::{CacheConfig, TieredConfig, DEFAULT_CACHE_SIZE};
pub use error::{Error, Result};
pub use key::{Key, KeyKind, NamedShape, SubKey};
pub use reclaim::Reclaimer;
pub use recency::{Iter as RecencyIter, NodeHandle, RecencyList};
pub use registry::{CacheRegistry, MAIN_CACHE};
pub use scope::{AttributeScope, AttributeValue, PipelineScope};
pub use stats::{CacheStats, TierStats, STATISTICS_ATTRIBUTE_PREFIX};
pub use tiered::{Elements, TieredCache, DEFAULT_SLOT};
pub use validity::Validity;
