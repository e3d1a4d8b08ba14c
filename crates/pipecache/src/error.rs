//! Error types for pipecache

use std::io;

use thiserror::Error;

/// Result type alias for pipecache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations
///
/// Argument errors leave the cache untouched. A stale lookup is not an error:
/// it returns normally with no value.
#[derive(Debug, Error)]
pub enum Error {
    /// A key constructor was missing a required discriminator
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Wrong number of keys for a multi-slot entry
    #[error("Bad number of keys: expected {expected}, got {actual}")]
    SlotCount {
        /// Slots configured on the cache
        expected: usize,
        /// Keys supplied by the caller
        actual: usize,
    },

    /// Slot name not configured on the cache
    #[error("Unknown key slot: '{0}'")]
    UnknownSlot(String),

    /// Slot name list rejected at construction
    #[error("Invalid slot names: {0}")]
    InvalidSlots(String),

    /// An entry already exists for one of the given keys
    #[error("Object already in cache for keys: {0}")]
    AlreadyCached(String),

    /// No entry for the given key in any tier
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Slot indices disagree on which entry a key belongs to
    #[error("Slot index {slot} disagrees with the entry being removed")]
    InconsistentIndex {
        /// First slot whose index disagreed
        slot: usize,
    },

    /// Configuration could not be parsed or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error while reading configuration
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
