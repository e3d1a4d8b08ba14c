//! Cache sizing configuration
//!
//! ```toml
//! default_size = 200
//!
//! [caches]
//! "pipecache.main" = 500
//!
//! [tiered.sessions]
//! max_hot = 64
//! slots = ["id", "path"]
//! max_reclaimable = 1024
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::hash::Hash;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::reclaim::Reclaimer;
use crate::tiered::{TieredCache, DEFAULT_SLOT};

/// Size given to bounded caches not listed in the configuration
pub const DEFAULT_CACHE_SIZE: usize = 200;

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_slots() -> Vec<String> {
    vec![DEFAULT_SLOT.to_string()]
}

/// Sizes of named bounded and tiered caches
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Capacity of bounded caches with no entry in `caches`
    #[serde(default = "default_cache_size")]
    pub default_size: usize,

    /// Capacity per bounded cache name
    #[serde(default)]
    pub caches: HashMap<String, usize>,

    /// Tiered cache layouts per name
    #[serde(default)]
    pub tiered: HashMap<String, TieredConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_CACHE_SIZE,
            caches: HashMap::new(),
            tiered: HashMap::new(),
        }
    }
}

/// Layout of one tiered cache
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TieredConfig {
    /// Hot tier capacity; zero sends entries straight to the reclaimable tier
    pub max_hot: usize,

    /// Slot names, in key order
    #[serde(default = "default_slots")]
    pub slots: Vec<String>,

    /// Optional bound on the reclaimable tier
    #[serde(default)]
    pub max_reclaimable: Option<usize>,
}

impl TieredConfig {
    /// Build an empty cache with this layout
    pub fn build<K, V>(&self, reclaimer: Reclaimer) -> Result<TieredCache<K, V>>
    where
        K: Eq + Hash + Clone + fmt::Debug,
        V: ?Sized + Send + Sync + 'static,
    {
        Ok(TieredCache::with_reclaimer(self.max_hot, &self.slots, reclaimer)?
            .with_max_reclaimable(self.max_reclaimable))
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.slots.is_empty() {
            return Err(Error::Config(format!("tiered cache '{}' has no slots", name)));
        }
        let mut seen = HashSet::new();
        for slot in &self.slots {
            if !seen.insert(slot.as_str()) {
                return Err(Error::Config(format!(
                    "tiered cache '{}' repeats slot '{}'",
                    name, slot
                )));
            }
        }
        Ok(())
    }
}

impl CacheConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check every tiered layout
    pub fn validate(&self) -> Result<()> {
        for (name, tiered) in &self.tiered {
            tiered.validate(name)?;
        }
        Ok(())
    }

    /// Capacity for the bounded cache called `name`
    pub fn size_for(&self, name: &str) -> usize {
        self.size_for_or(name, self.default_size)
    }

    /// Capacity for the bounded cache called `name`, `default_size` if unlisted
    pub fn size_for_or(&self, name: &str, default_size: usize) -> usize {
        self.caches.get(name).copied().unwrap_or(default_size)
    }

    /// Layout of the tiered cache called `name`
    pub fn tiered(&self, name: &str) -> Option<&TieredConfig> {
        self.tiered.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    const SAMPLE: &str = r#"
default_size = 50

[caches]
"pipecache.main" = 500

[tiered.sessions]
max_hot = 64
slots = ["id", "path"]
max_reclaimable = 1024

[tiered.fragments]
max_hot = 0
"#;

    #[test]
    fn test_parse_sample() {
        let config = CacheConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.default_size, 50);
        assert_eq!(config.size_for("pipecache.main"), 500);
        assert_eq!(config.size_for("other"), 50);
        assert_eq!(config.size_for_or("other", 9), 9);
        assert_eq!(config.size_for_or("pipecache.main", 9), 500);

        let sessions = config.tiered("sessions").unwrap();
        assert_eq!(sessions.max_hot, 64);
        assert_eq!(sessions.slots, vec!["id", "path"]);
        assert_eq!(sessions.max_reclaimable, Some(1024));

        let fragments = config.tiered("fragments").unwrap();
        assert_eq!(fragments.slots, vec![DEFAULT_SLOT]);
        assert_eq!(fragments.max_reclaimable, None);
        assert!(config.tiered("missing").is_none());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = CacheConfig::from_toml_str("").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.size_for("anything"), DEFAULT_CACHE_SIZE);
    }

    #[test]
    fn test_rejects_bad_documents() {
        assert!(matches!(
            CacheConfig::from_toml_str("default_sise = 3"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            CacheConfig::from_toml_str("[tiered.t]\nmax_hot = 1\nslots = []"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            CacheConfig::from_toml_str("[tiered.t]\nmax_hot = 1\nslots = [\"a\", \"a\"]"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = CacheConfig::load(file.path()).unwrap();
        assert_eq!(config.size_for("pipecache.main"), 500);

        let missing = file.path().with_extension("missing");
        assert!(matches!(CacheConfig::load(missing), Err(Error::Io(_))));
    }

    #[test]
    fn test_build_tiered() {
        let config = CacheConfig::from_toml_str(SAMPLE).unwrap();
        let cache: TieredCache<String, str> = config
            .tiered("sessions")
            .unwrap()
            .build(Reclaimer::new())
            .unwrap();

        cache
            .put(vec!["1".to_string(), "/a".to_string()], Arc::from("A"))
            .unwrap();
        assert_eq!(cache.max_hot_size(), 64);
        assert_eq!(cache.get("path", &"/a".to_string()).unwrap().as_deref(), Some("A"));
    }
}
