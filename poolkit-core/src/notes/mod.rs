//! Note cache: discovered notes and sync cursor per (public key, pool address).

use std::sync::Arc;

use crate::storage::encrypted::{EncryptedStore, Outcome};
use crate::storage::{pair_record_key, unix_now, StorageError, StorageResult};

pub mod cursor;
mod types;

pub use cursor::{latest, Cursor, CursorOrder, IndexerCursorOrder};
pub use types::{DiscoveryResult, MergeSummary, NoteChain, NoteEntry, NoteStatus};

const NOTES_RECORD_KIND: &str = "notes";

/// Encrypted cache of [`DiscoveryResult`]s.
#[derive(Clone)]
pub struct NoteCache {
    store: Arc<EncryptedStore>,
    cursor_order: Arc<dyn CursorOrder>,
}

impl std::fmt::Debug for NoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteCache").finish_non_exhaustive()
    }
}

impl NoteCache {
    /// Creates a cache over `store`, ordering cursors with `cursor_order`.
    #[must_use]
    pub fn new(store: Arc<EncryptedStore>, cursor_order: Arc<dyn CursorOrder>) -> Self {
        Self {
            store,
            cursor_order,
        }
    }

    /// Reads the cached discovery state.
    ///
    /// Returns `Ok(None)` if the pair was never populated.
    ///
    /// # Errors
    ///
    /// [`StorageError::Corruption`] if the record does not decrypt or decode,
    /// [`StorageError::EncryptionUnavailable`] if the session is locked.
    pub async fn get_cached_notes(
        &self,
        namespace: &str,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<Option<DiscoveryResult>> {
        let key = pair_record_key(NOTES_RECORD_KIND, public_key, pool_address)?;
        self.store.get_record(namespace, &key).await
    }

    /// Merges `notes` into the cached chain and advances the cursor.
    ///
    /// Unknown ids are appended, known ids take the incoming status, repeats
    /// are ignored. The stored cursor becomes the later of the stored and the
    /// incoming one, so redundant, partial or out-of-order batches are safe.
    /// Nothing is written when the merge changes nothing.
    ///
    /// # Errors
    ///
    /// [`StorageError::Unavailable`] on I/O failure or persistent write
    /// conflicts; the caller decides whether to refetch and retry.
    pub async fn store_discovered_notes(
        &self,
        namespace: &str,
        public_key: &str,
        pool_address: &str,
        notes: Vec<NoteEntry>,
        last_processed_cursor: Option<Cursor>,
    ) -> StorageResult<MergeSummary> {
        if notes.iter().any(|note| note.id.is_empty()) {
            return Err(StorageError::InvalidInput("note id must be non-empty".to_string()));
        }
        let key = pair_record_key(NOTES_RECORD_KIND, public_key, pool_address)?;
        let order = self.cursor_order.as_ref();
        let now = unix_now()?;

        let summary = self
            .store
            .update_record(namespace, &key, |current: Option<DiscoveryResult>| {
                let created = current.is_none();
                let mut result = current.unwrap_or_else(|| DiscoveryResult::empty(now));

                let previous = result.last_processed_cursor.clone();
                let mut summary = result.note_chain.merge(notes.iter().cloned());
                result.last_processed_cursor =
                    latest(order, previous.clone(), last_processed_cursor.clone());
                summary.cursor_advanced = result.last_processed_cursor != previous;

                if created || summary.changed() {
                    result.updated_at = now;
                    Ok(Outcome::Write(result, summary))
                } else {
                    Ok(Outcome::Unchanged(summary))
                }
            })
            .await?;

        log::debug!(
            "merged notes: {} appended, {} updated, cursor advanced: {}",
            summary.appended,
            summary.updated,
            summary.cursor_advanced
        );
        Ok(summary)
    }

    /// Removes the cached record of one pair. Other pairs are untouched.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn invalidate(
        &self,
        namespace: &str,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<()> {
        let key = pair_record_key(NOTES_RECORD_KIND, public_key, pool_address)?;
        self.store.remove(namespace, &key).await?;
        log::info!("invalidated cached notes for one pool");
        Ok(())
    }

    /// Unspent entries of the cached chain; empty if nothing is cached.
    ///
    /// # Errors
    ///
    /// As for [`NoteCache::get_cached_notes`].
    pub async fn spendable_notes(
        &self,
        namespace: &str,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<Vec<NoteEntry>> {
        Ok(self
            .get_cached_notes(namespace, public_key, pool_address)
            .await?
            .map(|result| result.note_chain.unspent().cloned().collect())
            .unwrap_or_default())
    }
}
