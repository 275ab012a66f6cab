//! Indexer pagination cursors.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque `endCursor` token handed out by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wraps a raw cursor string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw token, as the indexer expects it back.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Cursor {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Cursor {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Page ordering of cursors as defined by the indexer.
///
/// `Greater` means "a later page". Cursors are never compared numerically by
/// this crate; only through this capability.
pub trait CursorOrder: Send + Sync {
    /// Compares two cursors by page position.
    fn compare(&self, a: &Cursor, b: &Cursor) -> Ordering;
}

/// Ordering for indexers emitting zero-padded, fixed-alphabet sequence
/// cursors: a shorter cursor is earlier, equal lengths compare bytewise.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexerCursorOrder;

impl CursorOrder for IndexerCursorOrder {
    fn compare(&self, a: &Cursor, b: &Cursor) -> Ordering {
        a.0.len()
            .cmp(&b.0.len())
            .then_with(|| a.0.as_bytes().cmp(b.0.as_bytes()))
    }
}

/// The later of two optional cursors; an absent cursor never wins over a present one.
pub fn latest(
    order: &dyn CursorOrder,
    existing: Option<Cursor>,
    incoming: Option<Cursor>,
) -> Option<Cursor> {
    match (existing, incoming) {
        (Some(existing), Some(incoming)) => {
            if order.compare(&incoming, &existing) == Ordering::Greater {
                Some(incoming)
            } else {
                Some(existing)
            }
        }
        (existing, incoming) => existing.or(incoming),
    }
}
