//! Structural cache keys
//!
//! A key names a logical computation: who produced the artifact and from
//! what. Keys compose, so the key of a derived artifact embeds the keys of
//! its inputs and two derivations over equal inputs get equal keys.
//!
//! Keys are immutable and share their interior, so cloning is cheap. The
//! hash is computed once at construction.

use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use ahash::RandomState;

use crate::error::{Error, Result};

/// Fixed seeds: a key's memoized hash must not depend on which hasher
/// instance happened to build it.
const HASH_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Opaque discriminator carried by a leaf key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubKey {
    /// Text value, e.g. an expression or a URL
    Text(Arc<str>),
    /// Integer value
    Integer(i64),
    /// Raw bytes, e.g. a request digest
    Bytes(Arc<[u8]>),
}

impl From<&str> for SubKey {
    fn from(value: &str) -> Self {
        SubKey::Text(Arc::from(value))
    }
}

impl From<String> for SubKey {
    fn from(value: String) -> Self {
        SubKey::Text(Arc::from(value))
    }
}

impl From<i64> for SubKey {
    fn from(value: i64) -> Self {
        SubKey::Integer(value)
    }
}

impl From<&[u8]> for SubKey {
    fn from(value: &[u8]) -> Self {
        SubKey::Bytes(Arc::from(value))
    }
}

impl From<Vec<u8>> for SubKey {
    fn from(value: Vec<u8>) -> Self {
        SubKey::Bytes(Arc::from(value))
    }
}

impl fmt::Display for SubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubKey::Text(text) => write!(f, "{:?}", text),
            SubKey::Integer(n) => write!(f, "{}", n),
            SubKey::Bytes(bytes) => {
                for b in bytes.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// The two mutually exclusive shapes of a named key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamedShape {
    /// Type tag plus a string key
    Typed {
        /// Kind of artifact, e.g. "schema"
        type_tag: Arc<str>,
        /// Identifier within that kind
        key: Arc<str>,
    },
    /// Ordered child keys
    Children(Arc<[Key]>),
}

/// Variant-specific part of a key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// One opaque value under a named slot
    Leaf {
        /// Slot name within the producer
        slot: Arc<str>,
        /// Discriminating value
        value: SubKey,
    },
    /// Derivation from several upstream keys
    Compound {
        /// Slot name within the producer
        slot: Arc<str>,
        /// Upstream keys, order significant
        children: Arc<[Key]>,
    },
    /// Named artifact
    Named(NamedShape),
    /// Producer output consumed under a slot
    Wrapped {
        /// Slot name within the producer
        slot: Arc<str>,
        /// The upstream output key
        output: Key,
    },
}

struct KeyInner {
    producer: Arc<str>,
    kind: KeyKind,
    hash: u64,
}

/// Immutable, structurally compared cache key
#[derive(Clone)]
pub struct Key(Arc<KeyInner>);

impl Key {
    /// Key for one opaque value produced under `slot`
    pub fn leaf(producer: &str, slot: &str, value: impl Into<SubKey>) -> Result<Self> {
        let producer = required("producer", producer)?;
        let slot = required("slot", slot)?;
        Ok(Self::build(
            producer,
            KeyKind::Leaf {
                slot,
                value: value.into(),
            },
        ))
    }

    /// Key for an artifact derived from several upstream keys
    pub fn compound(producer: &str, slot: &str, children: Vec<Key>) -> Result<Self> {
        let producer = required("producer", producer)?;
        let slot = required("slot", slot)?;
        let children = required_children(children)?;
        Ok(Self::build(producer, KeyKind::Compound { slot, children }))
    }

    /// Named key identified by a type tag and a string key
    pub fn named(producer: &str, type_tag: &str, key: &str) -> Result<Self> {
        let producer = required("producer", producer)?;
        let type_tag = required("type tag", type_tag)?;
        Ok(Self::build(
            producer,
            KeyKind::Named(NamedShape::Typed {
                type_tag,
                key: Arc::from(key),
            }),
        ))
    }

    /// Named key identified by its child keys
    pub fn named_children(producer: &str, children: Vec<Key>) -> Result<Self> {
        let producer = required("producer", producer)?;
        let children = required_children(children)?;
        Ok(Self::build(
            producer,
            KeyKind::Named(NamedShape::Children(children)),
        ))
    }

    /// Key for an upstream output consumed by `producer` under `slot`
    pub fn wrapped(producer: &str, slot: &str, output: Key) -> Result<Self> {
        let producer = required("producer", producer)?;
        let slot = required("slot", slot)?;
        Ok(Self::build(producer, KeyKind::Wrapped { slot, output }))
    }

    fn build(producer: Arc<str>, kind: KeyKind) -> Self {
        let mut hasher = RandomState::with_seeds(
            HASH_SEEDS[0],
            HASH_SEEDS[1],
            HASH_SEEDS[2],
            HASH_SEEDS[3],
        )
        .build_hasher();
        producer.hash(&mut hasher);
        kind.hash(&mut hasher);
        let hash = hasher.finish();

        Key(Arc::new(KeyInner {
            producer,
            kind,
            hash,
        }))
    }

    /// Identity of the producer
    pub fn producer(&self) -> &str {
        &self.0.producer
    }

    /// Variant-specific fields
    pub fn kind(&self) -> &KeyKind {
        &self.0.kind
    }

    /// Directly nested keys, in order
    pub fn children(&self) -> &[Key] {
        match &self.0.kind {
            KeyKind::Compound { children, .. } => &children[..],
            KeyKind::Named(NamedShape::Children(children)) => &children[..],
            KeyKind::Wrapped { output, .. } => std::slice::from_ref(output),
            _ => &[],
        }
    }
}

fn required(field: &str, value: &str) -> Result<Arc<str>> {
    if value.is_empty() {
        return Err(Error::InvalidKey(format!("{} must not be empty", field)));
    }
    Ok(Arc::from(value))
}

fn required_children(children: Vec<Key>) -> Result<Arc<[Key]>> {
    if children.is_empty() {
        return Err(Error::InvalidKey("child key list must not be empty".to_string()));
    }
    Ok(Arc::from(children))
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.hash == other.0.hash
                && self.0.producer == other.0.producer
                && self.0.kind == other.0.kind)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let producer = &self.0.producer;
        match &self.0.kind {
            KeyKind::Leaf { slot, value } => write!(f, "{}/{}={}", producer, slot, value),
            KeyKind::Compound { slot, children } => {
                write!(f, "{}/{}", producer, slot)?;
                write_children(f, children)
            }
            KeyKind::Named(NamedShape::Typed { type_tag, key }) => {
                write!(f, "{}:{}={:?}", producer, type_tag, key)
            }
            KeyKind::Named(NamedShape::Children(children)) => {
                write!(f, "{}", producer)?;
                write_children(f, children)
            }
            KeyKind::Wrapped { slot, output } => write!(f, "{}/{}<-{}", producer, slot, output),
        }
    }
}

fn write_children(f: &mut fmt::Formatter<'_>, children: &[Key]) -> fmt::Result {
    write!(f, "(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", child)?;
    }
    write!(f, ")")
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn doc(path: &str) -> Key {
        Key::leaf("url-generator", "document", path).unwrap()
    }

    #[test]
    fn test_structural_equality() {
        let a = Key::compound("xslt", "data", vec![doc("a.xml"), doc("style.xsl")]).unwrap();
        let b = Key::compound("xslt", "data", vec![doc("a.xml"), doc("style.xsl")]).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.0.hash, b.0.hash);
    }

    #[test]
    fn test_child_order_matters() {
        let a = Key::compound("xslt", "data", vec![doc("a.xml"), doc("b.xml")]).unwrap();
        let b = Key::compound("xslt", "data", vec![doc("b.xml"), doc("a.xml")]).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_variants_are_distinct() {
        let leaf = Key::leaf("p", "slot", "x").unwrap();
        let named = Key::named("p", "slot", "x").unwrap();
        let wrapped = Key::wrapped("p", "slot", leaf.clone()).unwrap();
        let named_children = Key::named_children("p", vec![leaf.clone()]).unwrap();

        assert_ne!(leaf, named);
        assert_ne!(leaf, wrapped);
        assert_ne!(wrapped, named_children);
        assert_eq!(wrapped.children(), &[leaf.clone()]);
        assert!(leaf.children().is_empty());
    }

    #[test]
    fn test_sub_key_types_differ() {
        let text = Key::leaf("p", "id", "42").unwrap();
        let int = Key::leaf("p", "id", 42i64).unwrap();
        let bytes = Key::leaf("p", "id", vec![4u8, 2]).unwrap();

        assert_ne!(text, int);
        assert_ne!(int, bytes);
    }

    #[test]
    fn test_missing_discriminators() {
        assert!(matches!(Key::leaf("", "slot", "x"), Err(Error::InvalidKey(_))));
        assert!(matches!(Key::leaf("p", "", "x"), Err(Error::InvalidKey(_))));
        assert!(matches!(Key::compound("p", "s", Vec::new()), Err(Error::InvalidKey(_))));
        assert!(matches!(Key::named_children("p", Vec::new()), Err(Error::InvalidKey(_))));
        assert!(matches!(Key::named("p", "", "x"), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_usable_as_map_key() {
        let mut map = HashMap::new();
        map.insert(Key::wrapped("serializer", "data", doc("a.xml")).unwrap(), 1);

        let lookup = Key::wrapped("serializer", "data", doc("a.xml")).unwrap();
        assert_eq!(map.get(&lookup), Some(&1));
    }

    #[test]
    fn test_display() {
        let key = Key::compound("xslt", "data", vec![doc("a.xml"), Key::leaf("p", "n", 7i64).unwrap()])
            .unwrap();
        assert_eq!(
            key.to_string(),
            "xslt/data(url-generator/document=\"a.xml\", p/n=7)"
        );

        let digest = Key::leaf("request", "hash", vec![0xabu8, 0x01]).unwrap();
        assert_eq!(digest.to_string(), "request/hash=ab01");
    }
}
