//! Validity tokens and the lower-or-equal freshness check
//!
//! A token is a scalar or an ordered sequence of tokens. Tokens are only
//! comparable when they have the same shape; anything else is treated as
//! stale by the caches.

use std::cmp::Ordering;
use std::fmt;

/// Opaque, partially ordered freshness stamp
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Validity {
    /// Single order value, typically a modification time
    Scalar(i64),
    /// One token per input the artifact depends on
    Sequence(Vec<Validity>),
}

impl Validity {
    /// Build a sequence token
    pub fn sequence<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Validity>,
    {
        Validity::Sequence(items.into_iter().map(Into::into).collect())
    }

    /// Whether a value stored with `stored` may satisfy a request stamped `self`
    ///
    /// Scalars compare by natural order; sequences of equal length compare
    /// pairwise. Any shape mismatch is "not usable".
    pub fn lower_or_equal(&self, stored: &Validity) -> bool {
        match (self, stored) {
            (Validity::Scalar(requested), Validity::Scalar(stored)) => requested <= stored,
            (Validity::Sequence(requested), Validity::Sequence(stored)) => {
                requested.len() == stored.len()
                    && requested
                        .iter()
                        .zip(stored)
                        .all(|(r, s)| r.lower_or_equal(s))
            }
            _ => false,
        }
    }
}

impl From<i64> for Validity {
    fn from(value: i64) -> Self {
        Validity::Scalar(value)
    }
}

impl From<Vec<Validity>> for Validity {
    fn from(items: Vec<Validity>) -> Self {
        Validity::Sequence(items)
    }
}

impl From<Vec<i64>> for Validity {
    fn from(items: Vec<i64>) -> Self {
        Validity::sequence(items)
    }
}

/// Product order: `a <= b` exactly when `a.lower_or_equal(&b)`.
impl PartialOrd for Validity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Validity::Scalar(a), Validity::Scalar(b)) => Some(a.cmp(b)),
            (Validity::Sequence(a), Validity::Sequence(b)) if a.len() == b.len() => {
                let mut overall = Ordering::Equal;
                for (x, y) in a.iter().zip(b) {
                    match x.partial_cmp(y)? {
                        Ordering::Equal => {}
                        ordering if overall == Ordering::Equal => overall = ordering,
                        ordering if ordering != overall => return None,
                        _ => {}
                    }
                }
                Some(overall)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validity::Scalar(value) => write!(f, "{}", value),
            Validity::Sequence(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
