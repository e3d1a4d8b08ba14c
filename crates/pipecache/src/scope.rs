//! Request-scoped attribute stores
//!
//! The caches never own a scope. Callers pass one into every operation; the
//! caches use it to materialize statistics and hand it to payload
//! notifications.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::Mutex;

/// Value stored in a scope
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

/// Externally owned, per-call attribute store
pub trait AttributeScope {
    /// Look up an attribute
    fn attribute(&self, name: &str) -> Option<AttributeValue>;

    /// Set an attribute, replacing any previous value
    fn set_attribute(&self, name: &str, value: AttributeValue);

    /// Look up an attribute, creating it with `init` if absent
    ///
    /// Must be atomic: two callers racing on the same name get the same value.
    fn attribute_or_insert_with(
        &self,
        name: &str,
        init: &mut dyn FnMut() -> AttributeValue,
    ) -> AttributeValue;
}

/// In-memory scope for one pipeline run
#[derive(Default)]
pub struct PipelineScope {
    attributes: Mutex<HashMap<String, AttributeValue, RandomState>>,
}

impl PipelineScope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove an attribute, returning it
    pub fn remove_attribute(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.lock().remove(name)
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.attributes.lock().len()
    }

    /// Check if the scope holds no attributes
    pub fn is_empty(&self) -> bool {
        self.attributes.lock().is_empty()
    }
}

impl AttributeScope for PipelineScope {
    fn attribute(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.lock().get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: AttributeValue) {
        self.attributes.lock().insert(name.to_string(), value);
    }

    fn attribute_or_insert_with(
        &self,
        name: &str,
        init: &mut dyn FnMut() -> AttributeValue,
    ) -> AttributeValue {
        let mut attributes = self.attributes.lock();
        if let Some(value) = attributes.get(name) {
            return Arc::clone(value);
        }
        let value = init();
        attributes.insert(name.to_string(), Arc::clone(&value));
        value
    }
}
