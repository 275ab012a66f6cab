//! Storage façade: one handle over the blob store, the session and the two
//! record caches.

use std::sync::Arc;

use async_trait::async_trait;

use super::capabilities::{DepositIndexStorage, NoteStorage, SessionStorage};
use super::encrypted::{namespace_prefix, EncryptedStore};
use super::error::StorageResult;
use super::fs::FsBlobStore;
use super::memory::MemoryBlobStore;
use super::paths::StoragePaths;
use super::session::Session;
use super::traits::{AtomicBlobStore, DeviceKeystore};
use crate::config::StorageConfig;
use crate::deposit::{DepositIndexAllocator, DepositIndexState};
use crate::notes::{
    Cursor, CursorOrder, DiscoveryResult, IndexerCursorOrder, MergeSummary, NoteCache, NoteEntry,
};

struct PoolStorageInner {
    blobs: Arc<dyn AtomicBlobStore>,
    session: Arc<Session>,
    store: Arc<EncryptedStore>,
    notes: NoteCache,
    deposits: DepositIndexAllocator,
    config: StorageConfig,
}

/// Shared storage handle. Cheap to clone; all clones see the same session.
#[derive(Clone)]
pub struct PoolStorage {
    inner: Arc<PoolStorageInner>,
}

impl std::fmt::Debug for PoolStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolStorage")
            .field("session", &self.inner.session)
            .finish_non_exhaustive()
    }
}

impl PoolStorage {
    /// Creates a locked storage handle over `blobs`.
    ///
    /// # Errors
    ///
    /// Returns [`super::StorageError::InvalidInput`] if `config` is inconsistent.
    pub fn new(blobs: Arc<dyn AtomicBlobStore>, config: StorageConfig) -> StorageResult<Self> {
        Self::with_cursor_order(blobs, config, Arc::new(IndexerCursorOrder))
    }

    /// Like [`PoolStorage::new`], with a custom cursor ordering for the note cache.
    ///
    /// # Errors
    ///
    /// As for [`PoolStorage::new`].
    pub fn with_cursor_order(
        blobs: Arc<dyn AtomicBlobStore>,
        config: StorageConfig,
        cursor_order: Arc<dyn CursorOrder>,
    ) -> StorageResult<Self> {
        config.validate()?;
        let session = Arc::new(Session::new());
        let store = Arc::new(EncryptedStore::new(
            Arc::clone(&blobs),
            Arc::clone(&session),
            config.clone(),
        ));
        let notes = NoteCache::new(Arc::clone(&store), cursor_order);
        let deposits = DepositIndexAllocator::new(Arc::clone(&store), config.deposit_index_baseline);
        Ok(Self {
            inner: Arc::new(PoolStorageInner {
                blobs,
                session,
                store,
                notes,
                deposits,
                config,
            }),
        })
    }

    /// Volatile storage, gone when the last handle drops.
    ///
    /// # Errors
    ///
    /// As for [`PoolStorage::new`].
    pub fn in_memory(config: StorageConfig) -> StorageResult<Self> {
        Self::new(Arc::new(MemoryBlobStore::new()), config)
    }

    /// Storage persisted under `paths`.
    ///
    /// # Errors
    ///
    /// Returns [`super::StorageError::Unavailable`] if the directories or the
    /// lock file cannot be created.
    pub fn open(paths: StoragePaths, config: StorageConfig) -> StorageResult<Self> {
        let blobs = FsBlobStore::open(paths)?;
        log::info!("opened pool storage at {}", blobs.paths().root().display());
        Self::new(Arc::new(blobs), config)
    }

    /// Handle scoped to one account. Records of different accounts never mix.
    ///
    /// # Errors
    ///
    /// Returns [`super::StorageError::InvalidInput`] unless the name is 1 to 64 bytes.
    pub fn account(&self, account_name: &str) -> StorageResult<AccountStorage> {
        namespace_prefix(account_name)?;
        Ok(AccountStorage {
            account_name: account_name.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Configuration this handle was built with.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }
}

#[async_trait]
impl SessionStorage for PoolStorage {
    async fn unlock(&self, keystore: Arc<dyn DeviceKeystore>) -> StorageResult<()> {
        self.inner
            .session
            .unlock(keystore, self.inner.blobs.as_ref())
            .await
    }

    fn is_unlocked(&self) -> bool {
        self.inner.session.is_unlocked()
    }

    fn clear_session(&self) {
        self.inner.session.clear();
    }

    async fn clear_all_data(&self) -> StorageResult<()> {
        let keystore = self.inner.session.keystore();
        let removed = self.inner.store.clear_all().await?;
        self.inner.session.clear();
        log::info!("cleared all pool data ({removed} blobs)");

        // The old envelope is gone; start over with a fresh data key.
        if let Some(keystore) = keystore {
            self.inner
                .session
                .unlock(keystore, self.inner.blobs.as_ref())
                .await?;
        }
        Ok(())
    }

    async fn has_encrypted_data(&self, account_name: Option<&str>) -> StorageResult<bool> {
        self.inner.store.has_encrypted_data(account_name).await
    }

    async fn clear_account(&self, account_name: &str) -> StorageResult<()> {
        let removed = self.inner.store.clear_account(account_name).await?;
        log::info!("cleared account data ({removed} blobs)");
        Ok(())
    }
}

/// Storage of a single account.
#[derive(Clone)]
pub struct AccountStorage {
    account_name: String,
    inner: Arc<PoolStorageInner>,
}

impl std::fmt::Debug for AccountStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountStorage")
            .field("account_name", &self.account_name)
            .finish_non_exhaustive()
    }
}

impl AccountStorage {
    /// The account this handle is scoped to.
    #[must_use]
    pub fn account_name(&self) -> &str {
        &self.account_name
    }
}

#[async_trait]
impl NoteStorage for AccountStorage {
    async fn get_cached_notes(
        &self,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<Option<DiscoveryResult>> {
        self.inner
            .notes
            .get_cached_notes(&self.account_name, public_key, pool_address)
            .await
    }

    async fn store_discovered_notes(
        &self,
        public_key: &str,
        pool_address: &str,
        notes: Vec<NoteEntry>,
        last_processed_cursor: Option<Cursor>,
    ) -> StorageResult<MergeSummary> {
        self.inner
            .notes
            .store_discovered_notes(
                &self.account_name,
                public_key,
                pool_address,
                notes,
                last_processed_cursor,
            )
            .await
    }

    async fn invalidate(&self, public_key: &str, pool_address: &str) -> StorageResult<()> {
        self.inner
            .notes
            .invalidate(&self.account_name, public_key, pool_address)
            .await
    }

    async fn spendable_notes(
        &self,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<Vec<NoteEntry>> {
        self.inner
            .notes
            .spendable_notes(&self.account_name, public_key, pool_address)
            .await
    }
}

#[async_trait]
impl DepositIndexStorage for AccountStorage {
    async fn get_next_deposit_index(
        &self,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<u64> {
        self.inner
            .deposits
            .get_next_deposit_index(&self.account_name, public_key, pool_address)
            .await
    }

    async fn update_last_used_deposit_index(
        &self,
        public_key: &str,
        pool_address: &str,
        deposit_index: u64,
    ) -> StorageResult<()> {
        self.inner
            .deposits
            .update_last_used_deposit_index(
                &self.account_name,
                public_key,
                pool_address,
                deposit_index,
            )
            .await
    }

    async fn seed_deposit_index(
        &self,
        public_key: &str,
        pool_address: &str,
        last_used_index: u64,
    ) -> StorageResult<u64> {
        self.inner
            .deposits
            .seed_deposit_index(&self.account_name, public_key, pool_address, last_used_index)
            .await
    }

    async fn deposit_index_state(
        &self,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<DepositIndexState> {
        self.inner
            .deposits
            .deposit_index_state(&self.account_name, public_key, pool_address)
            .await
    }

    async fn clear_deposit_index(
        &self,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<()> {
        self.inner
            .deposits
            .clear_deposit_index(&self.account_name, public_key, pool_address)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::NoteStatus;
    use crate::storage::tests_utils::{FaultyBlobStore, InMemoryKeystore};
    use crate::storage::StorageError;

    const PK: &str = "0xpub";
    const POOL: &str = "0xpool";

    fn note(id: &str, index: u64) -> NoteEntry {
        NoteEntry::new(id, index, vec![0xAB; 4], NoteStatus::Unspent)
    }

    async fn unlocked() -> PoolStorage {
        let storage = PoolStorage::in_memory(StorageConfig::default()).expect("storage");
        storage
            .unlock(Arc::new(InMemoryKeystore::new()))
            .await
            .expect("unlock");
        storage
    }

    #[tokio::test]
    async fn test_accounts_are_isolated() {
        let storage = unlocked().await;
        let alice = storage.account("alice").expect("account");
        let bob = storage.account("bob").expect("account");

        alice
            .store_discovered_notes(PK, POOL, vec![note("n1", 0)], Some(Cursor::from("1")))
            .await
            .expect("store");
        alice
            .update_last_used_deposit_index(PK, POOL, 3)
            .await
            .expect("commit");

        assert!(bob.get_cached_notes(PK, POOL).await.expect("get").is_none());
        assert_eq!(bob.get_next_deposit_index(PK, POOL).await.expect("next"), 0);

        storage.clear_account("bob").await.expect("clear bob");
        assert!(alice.get_cached_notes(PK, POOL).await.expect("get").is_some());
        assert!(storage.has_encrypted_data(Some("alice")).await.expect("has"));
        assert!(!storage.has_encrypted_data(Some("bob")).await.expect("has"));

        storage.clear_account("alice").await.expect("clear alice");
        assert!(alice.get_cached_notes(PK, POOL).await.expect("get").is_none());
        assert!(!storage.has_encrypted_data(None).await.expect("has"));
    }

    #[tokio::test]
    async fn test_clear_all_data_leaves_usable_empty_store() {
        let storage = unlocked().await;
        let alice = storage.account("alice").expect("account");
        alice
            .store_discovered_notes(PK, POOL, vec![note("n1", 0)], None)
            .await
            .expect("store");
        alice.seed_deposit_index(PK, POOL, 9).await.expect("seed");

        storage.clear_all_data().await.expect("clear");
        storage.clear_all_data().await.expect("clear is idempotent");

        assert!(storage.is_unlocked());
        assert!(!storage.has_encrypted_data(None).await.expect("has"));
        assert!(alice.get_cached_notes(PK, POOL).await.expect("get").is_none());
        assert_eq!(
            alice.deposit_index_state(PK, POOL).await.expect("state"),
            DepositIndexState::Unseeded
        );

        alice
            .store_discovered_notes(PK, POOL, vec![note("n2", 1)], None)
            .await
            .expect("store after wipe");
        assert_eq!(alice.spendable_notes(PK, POOL).await.expect("spendable").len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_clear_all_data_resumes() {
        let blobs = Arc::new(FaultyBlobStore::new());
        let storage = PoolStorage::new(blobs.clone(), StorageConfig::default()).expect("storage");
        storage
            .unlock(Arc::new(InMemoryKeystore::new()))
            .await
            .expect("unlock");
        for name in ["alice", "bob"] {
            let account = storage.account(name).expect("account");
            account
                .store_discovered_notes(PK, POOL, vec![note("n1", 0)], Some(Cursor::from("1")))
                .await
                .expect("store");
            account.seed_deposit_index(PK, POOL, 4).await.expect("seed");
        }

        blobs.fail_deletes_after(Some(1));
        assert!(matches!(
            storage.clear_all_data().await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(storage.is_unlocked());
        assert!(storage.has_encrypted_data(None).await.expect("has"));

        blobs.fail_deletes_after(None);
        storage.clear_all_data().await.expect("retry");

        assert!(!storage.has_encrypted_data(None).await.expect("has"));
        for name in ["alice", "bob"] {
            let account = storage.account(name).expect("account");
            assert!(account.get_cached_notes(PK, POOL).await.expect("get").is_none());
            assert_eq!(
                account.deposit_index_state(PK, POOL).await.expect("state"),
                DepositIndexState::Unseeded
            );
        }
    }

    #[tokio::test]
    async fn test_clear_session_fails_closed_until_unlocked() {
        let storage = PoolStorage::in_memory(StorageConfig::default()).expect("storage");
        let keystore = Arc::new(InMemoryKeystore::new());
        storage.unlock(keystore.clone()).await.expect("unlock");
        let alice = storage.account("alice").expect("account");
        alice.update_last_used_deposit_index(PK, POOL, 0).await.expect("commit");

        storage.clear_session();
        assert_eq!(
            alice.get_next_deposit_index(PK, POOL).await,
            Err(StorageError::EncryptionUnavailable)
        );

        storage.unlock(keystore).await.expect("unlock again");
        assert_eq!(alice.get_next_deposit_index(PK, POOL).await, Ok(1));
    }

    #[tokio::test]
    async fn test_rejects_bad_inputs() {
        let storage = unlocked().await;
        assert!(matches!(
            storage.account(""),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(
            storage.account(&"x".repeat(65)),
            Err(StorageError::InvalidInput(_))
        ));
        let alice = storage.account("alice").expect("account");
        assert!(matches!(
            alice.get_next_deposit_index("", POOL).await,
            Err(StorageError::InvalidInput(_))
        ));

        let config = StorageConfig {
            sync_page_size: 0,
            ..StorageConfig::default()
        };
        assert!(PoolStorage::in_memory(config).is_err());
    }
}
