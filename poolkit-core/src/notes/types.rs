//! Note chain data model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::cursor::Cursor;

/// Lifecycle tag of a discovered note.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NoteStatus {
    /// Spendable.
    Unspent,
    /// Consumed on chain.
    Spent,
    /// Seen in a submitted but unconfirmed operation.
    Pending,
}

/// One discovered note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEntry {
    /// Stable identifier, unique within a chain.
    pub id: String,
    /// Deposit index or discovery sequence number.
    pub index: u64,
    /// Derived commitment data, opaque to this crate.
    pub commitment: Vec<u8>,
    /// Current status.
    pub status: NoteStatus,
}

impl NoteEntry {
    /// Builds an entry.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        index: u64,
        commitment: Vec<u8>,
        status: NoteStatus,
    ) -> Self {
        Self {
            id: id.into(),
            index,
            commitment,
            status,
        }
    }
}

/// Counts of what a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Entries not seen before, appended to the chain.
    pub appended: usize,
    /// Known entries whose status changed.
    pub updated: usize,
    /// Whether the stored cursor moved forward.
    pub cursor_advanced: bool,
}

impl MergeSummary {
    /// Whether anything was modified.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.appended > 0 || self.updated > 0 || self.cursor_advanced
    }
}

/// Notes discovered for one account/pool pair, in first-seen order.
///
/// Entries are unique by id and never removed; a merge only appends or
/// updates status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteChain {
    entries: Vec<NoteEntry>,
}

impl NoteChain {
    /// An empty chain.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Entries in first-seen order.
    #[must_use]
    pub fn entries(&self) -> &[NoteEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an entry by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&NoteEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Entries currently [`NoteStatus::Unspent`].
    pub fn unspent(&self) -> impl Iterator<Item = &NoteEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.status == NoteStatus::Unspent)
    }

    /// Merges `incoming` by id: unknown ids are appended in order, known ids
    /// take the incoming status, exact repeats change nothing.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = NoteEntry>) -> MergeSummary {
        let mut positions: HashMap<String, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.id.clone(), position))
            .collect();
        let mut summary = MergeSummary::default();

        for entry in incoming {
            if let Some(&position) = positions.get(&entry.id) {
                let known = &mut self.entries[position];
                if known.status != entry.status {
                    log::debug!(
                        "note status {} -> {} at index {}",
                        known.status,
                        entry.status,
                        known.index
                    );
                    known.status = entry.status;
                    summary.updated += 1;
                }
            } else {
                positions.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
                summary.appended += 1;
            }
        }
        summary
    }
}

impl FromIterator<NoteEntry> for NoteChain {
    fn from_iter<I: IntoIterator<Item = NoteEntry>>(iter: I) -> Self {
        let mut chain = Self::new();
        chain.merge(iter);
        chain
    }
}

/// Cached discovery state for one (public key, pool address) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    /// Notes discovered so far.
    pub note_chain: NoteChain,
    /// Furthest indexer page fully processed.
    pub last_processed_cursor: Option<Cursor>,
    /// Unix seconds of the last persisted change.
    pub updated_at: u64,
}

impl DiscoveryResult {
    pub(crate) const fn empty(now: u64) -> Self {
        Self {
            note_chain: NoteChain::new(),
            last_processed_cursor: None,
            updated_at: now,
        }
    }
}
