//! Capability traits consumed by wallet flows.
//!
//! Each consumer depends on the narrowest trait it needs; the façade in
//! [`super::facade`] implements all three.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::StorageResult;
use super::traits::DeviceKeystore;
use crate::deposit::DepositIndexState;
use crate::notes::{Cursor, DiscoveryResult, MergeSummary, NoteEntry};

/// Cached note discovery for one account.
#[async_trait]
pub trait NoteStorage: Send + Sync {
    /// Cached discovery state of the pair, `None` if never populated.
    ///
    /// # Errors
    ///
    /// [`super::StorageError::Corruption`] if the record does not open,
    /// [`super::StorageError::EncryptionUnavailable`] while locked.
    async fn get_cached_notes(
        &self,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<Option<DiscoveryResult>>;

    /// Merges `notes` into the cached chain and advances the cursor.
    ///
    /// # Errors
    ///
    /// [`super::StorageError::Unavailable`] on I/O failure or persistent conflicts.
    async fn store_discovered_notes(
        &self,
        public_key: &str,
        pool_address: &str,
        notes: Vec<NoteEntry>,
        last_processed_cursor: Option<Cursor>,
    ) -> StorageResult<MergeSummary>;

    /// Drops the cached record of the pair.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    async fn invalidate(&self, public_key: &str, pool_address: &str) -> StorageResult<()>;

    /// Unspent entries of the cached chain.
    ///
    /// # Errors
    ///
    /// As for [`NoteStorage::get_cached_notes`].
    async fn spendable_notes(
        &self,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<Vec<NoteEntry>>;
}

/// Deposit index allocation for one account.
#[async_trait]
pub trait DepositIndexStorage: Send + Sync {
    /// Next candidate index of the pair. Reserves nothing.
    ///
    /// # Errors
    ///
    /// As for [`NoteStorage::get_cached_notes`].
    async fn get_next_deposit_index(
        &self,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<u64>;

    /// Commits `deposit_index` as used.
    ///
    /// # Errors
    ///
    /// [`super::StorageError::IndexRegression`] if the index is already used.
    async fn update_last_used_deposit_index(
        &self,
        public_key: &str,
        pool_address: &str,
        deposit_index: u64,
    ) -> StorageResult<()>;

    /// Seeds the pair with an externally known last used index.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    async fn seed_deposit_index(
        &self,
        public_key: &str,
        pool_address: &str,
        last_used_index: u64,
    ) -> StorageResult<u64>;

    /// Whether the pair has a record yet.
    ///
    /// # Errors
    ///
    /// As for [`NoteStorage::get_cached_notes`].
    async fn deposit_index_state(
        &self,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<DepositIndexState>;

    /// Returns the pair to unseeded.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    async fn clear_deposit_index(&self, public_key: &str, pool_address: &str)
        -> StorageResult<()>;
}

/// Session and bulk-data lifecycle.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Loads the data key with `keystore`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns the keystore error if the envelope does not open.
    async fn unlock(&self, keystore: Arc<dyn DeviceKeystore>) -> StorageResult<()>;

    /// Whether a data key is loaded.
    fn is_unlocked(&self) -> bool;

    /// Forgets the data key. Persisted data stays.
    fn clear_session(&self);

    /// Irreversibly wipes every account and the key envelope.
    ///
    /// # Errors
    ///
    /// [`super::StorageError::Unavailable`] if the wipe did not finish; calling
    /// again resumes it.
    async fn clear_all_data(&self) -> StorageResult<()>;

    /// Whether any record exists, optionally for a single account.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    async fn has_encrypted_data(&self, account_name: Option<&str>) -> StorageResult<bool>;

    /// Wipes one account's records.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    async fn clear_account(&self, account_name: &str) -> StorageResult<()>;
}
