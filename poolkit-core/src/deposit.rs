//! Deposit index allocator.
//!
//! Reading the next candidate and committing it are two separate calls, so
//! note construction can run in between without holding anything. The commit
//! is a compare-and-swap on the stored record: of two flows racing for the
//! same index, exactly one wins and the other gets
//! [`StorageError::IndexRegression`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::encrypted::{EncryptedStore, Outcome};
use crate::storage::{pair_record_key, unix_now, StorageError, StorageResult};

const DEPOSIT_RECORD_KIND: &str = "deposit-index";

/// Last committed deposit index of one (public key, pool address) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositIndexRecord {
    /// Account public key.
    pub public_key: String,
    /// Pool contract address.
    pub pool_address: String,
    /// Highest index confirmed as used. Never decreases.
    pub last_used_index: u64,
    /// Unix seconds of the last commit.
    pub updated_at: u64,
}

impl DepositIndexRecord {
    fn next_index(&self) -> StorageResult<u64> {
        self.last_used_index.checked_add(1).ok_or_else(|| {
            StorageError::InvalidInput("deposit index space exhausted".to_string())
        })
    }
}

/// Allocation state of a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositIndexState {
    /// Nothing committed yet; the next candidate is the configured baseline.
    Unseeded,
    /// At least one commit or seed happened.
    Ready(DepositIndexRecord),
}

/// Allocates deposit indices from encrypted per-pair records.
#[derive(Debug, Clone)]
pub struct DepositIndexAllocator {
    store: Arc<EncryptedStore>,
    baseline: u64,
}

impl DepositIndexAllocator {
    /// Creates an allocator whose unseeded pairs start at `baseline`.
    #[must_use]
    pub const fn new(store: Arc<EncryptedStore>, baseline: u64) -> Self {
        Self { store, baseline }
    }

    /// Current state of the pair.
    ///
    /// # Errors
    ///
    /// [`StorageError::Corruption`] or [`StorageError::EncryptionUnavailable`]
    /// as for any encrypted read.
    pub async fn deposit_index_state(
        &self,
        namespace: &str,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<DepositIndexState> {
        let key = pair_record_key(DEPOSIT_RECORD_KIND, public_key, pool_address)?;
        Ok(self
            .store
            .get_record::<DepositIndexRecord>(namespace, &key)
            .await?
            .map_or(DepositIndexState::Unseeded, DepositIndexState::Ready))
    }

    /// Next candidate index: `last_used_index + 1`, or the baseline when unseeded.
    ///
    /// Advisory only; nothing is reserved, so repeated calls return the same
    /// value until a commit lands.
    ///
    /// # Errors
    ///
    /// As for [`DepositIndexAllocator::deposit_index_state`].
    pub async fn get_next_deposit_index(
        &self,
        namespace: &str,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<u64> {
        match self
            .deposit_index_state(namespace, public_key, pool_address)
            .await?
        {
            DepositIndexState::Unseeded => Ok(self.baseline),
            DepositIndexState::Ready(record) => record.next_index(),
        }
    }

    /// Commits `deposit_index` as used.
    ///
    /// Gaps are accepted; anything below the next candidate is not.
    ///
    /// # Errors
    ///
    /// [`StorageError::IndexRegression`] if `deposit_index` is already used
    /// (or below the baseline), [`StorageError::Unavailable`] on I/O failure.
    pub async fn update_last_used_deposit_index(
        &self,
        namespace: &str,
        public_key: &str,
        pool_address: &str,
        deposit_index: u64,
    ) -> StorageResult<()> {
        let key = pair_record_key(DEPOSIT_RECORD_KIND, public_key, pool_address)?;
        let now = unix_now()?;
        let baseline = self.baseline;

        self.store
            .update_record(namespace, &key, |current: Option<DepositIndexRecord>| {
                let next = match &current {
                    Some(record) => record.next_index()?,
                    None => baseline,
                };
                if deposit_index < next {
                    return Err(StorageError::IndexRegression {
                        attempted: deposit_index,
                        next,
                    });
                }
                let record = DepositIndexRecord {
                    public_key: public_key.to_string(),
                    pool_address: pool_address.to_string(),
                    last_used_index: deposit_index,
                    updated_at: now,
                };
                Ok(Outcome::Write(record, ()))
            })
            .await
            .inspect_err(|err| {
                if let StorageError::IndexRegression { attempted, next } = err {
                    log::warn!("rejected deposit index {attempted}, next candidate is {next}");
                }
            })?;

        log::debug!("committed deposit index {deposit_index}");
        Ok(())
    }

    /// Seeds the pair with an externally known last used index.
    ///
    /// Moves an unseeded pair to ready; on a ready pair the stored index
    /// becomes the larger of the two. Returns the resulting last used index.
    ///
    /// # Errors
    ///
    /// As for [`DepositIndexAllocator::update_last_used_deposit_index`],
    /// minus the regression case.
    pub async fn seed_deposit_index(
        &self,
        namespace: &str,
        public_key: &str,
        pool_address: &str,
        last_used_index: u64,
    ) -> StorageResult<u64> {
        let key = pair_record_key(DEPOSIT_RECORD_KIND, public_key, pool_address)?;
        let now = unix_now()?;

        self.store
            .update_record(namespace, &key, |current: Option<DepositIndexRecord>| {
                match current {
                    Some(record) if record.last_used_index >= last_used_index => {
                        Ok(Outcome::Unchanged(record.last_used_index))
                    }
                    _ => Ok(Outcome::Write(
                        DepositIndexRecord {
                            public_key: public_key.to_string(),
                            pool_address: pool_address.to_string(),
                            last_used_index,
                            updated_at: now,
                        },
                        last_used_index,
                    )),
                }
            })
            .await
    }

    /// Deletes the pair's record, returning it to unseeded.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn clear_deposit_index(
        &self,
        namespace: &str,
        public_key: &str,
        pool_address: &str,
    ) -> StorageResult<()> {
        let key = pair_record_key(DEPOSIT_RECORD_KIND, public_key, pool_address)?;
        self.store.remove(namespace, &key).await
    }
}
