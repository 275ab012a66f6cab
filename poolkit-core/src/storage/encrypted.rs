//! Encrypted key-value store over an [`AtomicBlobStore`].
//!
//! Blob names are `hex(namespace) "." hex(sha256(key))`, so the backing store
//! sees neither account names in clear nor record keys. Every blob is sealed
//! under the session data key with its own name as associated data: a blob
//! copied under another name fails to open.
//!
//! A sealed blob is `key_id || nonce || ciphertext`, and the key id is bound
//! into the associated data too. Before every sealed read or write the store
//! checks the key envelope: when another handle wiped the store and a new
//! key generation took over, the session is locked and the call fails with
//! [`StorageError::EncryptionUnavailable`] instead of writing records nobody
//! else can open. Records left behind by an older generation read as absent.

use std::sync::Arc;

use backon::Retryable;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::envelope::KeyEnvelope;
use super::error::{StorageError, StorageResult};
use super::keys::{DataKey, KeyId, KEY_ID_LEN};
use super::session::Session;
use super::traits::AtomicBlobStore;
use super::KEY_ENVELOPE_NAME;
use crate::config::StorageConfig;

const RECORD_VERSION: u32 = 1;
const MAX_NAMESPACE_LEN: usize = 64;

/// Result of applying a read-modify-write step to the current record.
pub(crate) enum Outcome<R, T> {
    /// Persist `R`, then return `T`.
    Write(R, T),
    /// Leave the stored record as is and return `T`.
    Unchanged(T),
}

enum TxnError {
    Conflict,
    Storage(StorageError),
}

impl From<StorageError> for TxnError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

#[derive(Serialize)]
struct StoredRecordRef<'a, R> {
    version: u32,
    record: &'a R,
}

#[derive(Deserialize)]
struct StoredRecord<R> {
    version: u32,
    record: R,
}

/// Namespace-scoped encrypted record store.
pub struct EncryptedStore {
    blobs: Arc<dyn AtomicBlobStore>,
    session: Arc<Session>,
    config: StorageConfig,
}

impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedStore")
            .field("unlocked", &self.session.is_unlocked())
            .finish_non_exhaustive()
    }
}

impl EncryptedStore {
    /// Wraps `blobs`, sealing with whatever key `session` holds.
    #[must_use]
    pub fn new(
        blobs: Arc<dyn AtomicBlobStore>,
        session: Arc<Session>,
        config: StorageConfig,
    ) -> Self {
        Self {
            blobs,
            session,
            config,
        }
    }

    /// The session whose data key seals this store.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Seals and writes `plaintext` under (`namespace`, `key`).
    ///
    /// The seal happens before any I/O; a failed seal or write leaves the
    /// previous blob in place.
    ///
    /// # Errors
    ///
    /// [`StorageError::EncryptionUnavailable`] when locked or when the key was
    /// replaced by a wipe, or the backend error.
    pub async fn put(&self, namespace: &str, key: &str, plaintext: &[u8]) -> StorageResult<()> {
        let name = blob_name(namespace, key)?;
        let sealed = seal_blob(&*self.current_key().await?, &name, plaintext)?;
        self.blobs.write_atomic(&name, &sealed).await
    }

    /// Reads and opens the blob under (`namespace`, `key`).
    ///
    /// # Errors
    ///
    /// Fails closed with [`StorageError::EncryptionUnavailable`] when locked
    /// or when the key was replaced by a wipe, and with
    /// [`StorageError::Corruption`] when the blob does not open.
    pub async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let name = blob_name(namespace, key)?;
        let data_key = self.current_key().await?;
        let Some(sealed) = self.blobs.read(&name).await? else {
            return Ok(None);
        };
        self.open_blob(&data_key, &name, &sealed).await
    }

    /// Deletes the blob under (`namespace`, `key`) if present.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn remove(&self, namespace: &str, key: &str) -> StorageResult<()> {
        let name = blob_name(namespace, key)?;
        self.blobs.delete(&name).await
    }

    /// Whether any record exists, for one account or across all of them.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn has_encrypted_data(&self, account_name: Option<&str>) -> StorageResult<bool> {
        let prefix = match account_name {
            Some(name) => namespace_prefix(name)?,
            None => String::new(),
        };
        Ok(self
            .blobs
            .list(&prefix)
            .await?
            .iter()
            .any(|name| name != KEY_ENVELOPE_NAME))
    }

    /// Removes every blob tagged with `account_name`. Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// [`StorageError::Unavailable`] if concurrent writers keep repopulating
    /// the namespace past the retry bound; calling again resumes the clear.
    pub async fn clear_account(&self, account_name: &str) -> StorageResult<usize> {
        let prefix = namespace_prefix(account_name)?;
        self.delete_prefix(&prefix).await
    }

    /// Removes every blob, including the key envelope.
    ///
    /// # Errors
    ///
    /// As for [`EncryptedStore::clear_account`].
    pub async fn clear_all(&self) -> StorageResult<usize> {
        self.delete_prefix("").await
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let mut removed = 0;
        for _ in 0..=self.config.cas_max_retries {
            let mut names = self.blobs.list(prefix).await?;
            if names.is_empty() {
                return Ok(removed);
            }
            // The envelope goes last: an interrupted wipe keeps the session usable.
            names.sort_by_key(|name| name == KEY_ENVELOPE_NAME);
            for name in &names {
                self.blobs.delete(name).await?;
            }
            removed += names.len();
        }
        Err(StorageError::Unavailable(
            "blobs kept reappearing while clearing".to_string(),
        ))
    }

    /// Reads and decodes the record under (`namespace`, `key`).
    pub(crate) async fn get_record<R: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> StorageResult<Option<R>> {
        let name = blob_name(namespace, key)?;
        let data_key = self.current_key().await?;
        let Some(sealed) = self.blobs.read(&name).await? else {
            return Ok(None);
        };
        self.open_blob(&data_key, &name, &sealed)
            .await?
            .map(|plaintext| decode_record(&plaintext))
            .transpose()
    }

    /// Optimistic read-modify-write of one record.
    ///
    /// `apply` sees the current record and decides what to persist. The write
    /// is a compare-and-swap against the exact bytes read; on conflict the
    /// whole step reruns with backoff, up to `cas_max_retries` times, then
    /// fails with [`StorageError::Unavailable`]. Errors returned by `apply`
    /// are never retried.
    pub(crate) async fn update_record<R, T, F>(
        &self,
        namespace: &str,
        key: &str,
        apply: F,
    ) -> StorageResult<T>
    where
        R: Serialize + DeserializeOwned + Send,
        T: Send,
        F: Fn(Option<R>) -> StorageResult<Outcome<R, T>> + Sync,
    {
        let name = blob_name(namespace, key)?;
        let name = name.as_str();
        let apply = &apply;

        let attempt = move || async move { self.try_update(name, apply).await };
        attempt
            .retry(self.config.cas_backoff())
            .when(|err: &TxnError| matches!(err, TxnError::Conflict))
            .notify(|_, delay| {
                log::debug!(
                    "compare-and-swap conflict on record {}, retrying in {delay:?}",
                    short_name(name)
                );
            })
            .await
            .map_err(|err| match err {
                TxnError::Conflict => StorageError::Unavailable(format!(
                    "compare-and-swap still conflicting after {} retries",
                    self.config.cas_max_retries
                )),
                TxnError::Storage(err) => err,
            })
    }

    async fn try_update<R, T, F>(&self, name: &str, apply: &F) -> Result<T, TxnError>
    where
        R: Serialize + DeserializeOwned + Send,
        T: Send,
        F: Fn(Option<R>) -> StorageResult<Outcome<R, T>> + Sync,
    {
        let data_key = self.current_key().await?;
        let current = self.blobs.read(name).await?;
        let plaintext = match current.as_deref() {
            Some(sealed) => self.open_blob(&data_key, name, sealed).await?,
            None => None,
        };
        let record = plaintext
            .map(|plaintext| decode_record::<R>(&plaintext))
            .transpose()?;

        match apply(record)? {
            Outcome::Unchanged(out) => Ok(out),
            Outcome::Write(record, out) => {
                let sealed = seal_blob(&data_key, name, &encode_record(&record)?)?;
                if self
                    .blobs
                    .compare_and_swap(name, current.as_deref(), &sealed)
                    .await?
                {
                    Ok(out)
                } else {
                    Err(TxnError::Conflict)
                }
            }
        }
    }

    /// The session key, provided the stored envelope still names its generation.
    async fn current_key(&self) -> StorageResult<Arc<DataKey>> {
        let data_key = self.session.data_key()?;
        if self.envelope_key_id().await? == Some(*data_key.id()) {
            Ok(data_key)
        } else {
            Err(self.superseded(&data_key))
        }
    }

    async fn envelope_key_id(&self) -> StorageResult<Option<KeyId>> {
        let Some(bytes) = self.blobs.read(KEY_ENVELOPE_NAME).await? else {
            return Ok(None);
        };
        Ok(Some(KeyEnvelope::deserialize(&bytes)?.key_id))
    }

    fn superseded(&self, data_key: &DataKey) -> StorageError {
        self.session.forget(data_key.id());
        StorageError::EncryptionUnavailable
    }

    /// Opens a sealed blob. `None` means it belongs to an older key generation.
    async fn open_blob(
        &self,
        data_key: &DataKey,
        name: &str,
        sealed: &[u8],
    ) -> StorageResult<Option<Vec<u8>>> {
        if sealed.len() < KEY_ID_LEN {
            return Err(StorageError::Corruption("sealed record too short".to_string()));
        }
        let (id, body) = sealed.split_at(KEY_ID_LEN);
        if id == data_key.id() {
            return data_key.open(&record_ad(name, id), body).map(Some);
        }
        // Sealed by another generation: a leftover from before the last
        // wipe, unless our own key is the stale one.
        if self.envelope_key_id().await? == Some(*data_key.id()) {
            log::warn!(
                "ignoring record {} sealed under a wiped key",
                short_name(name)
            );
            Ok(None)
        } else {
            Err(self.superseded(data_key))
        }
    }
}

pub(crate) fn namespace_prefix(namespace: &str) -> StorageResult<String> {
    if namespace.is_empty() || namespace.len() > MAX_NAMESPACE_LEN {
        return Err(StorageError::InvalidInput(format!(
            "account name must be 1..={MAX_NAMESPACE_LEN} bytes"
        )));
    }
    Ok(format!("{}.", hex::encode(namespace)))
}

fn blob_name(namespace: &str, key: &str) -> StorageResult<String> {
    let mut name = namespace_prefix(namespace)?;
    name.push_str(&hex::encode(Sha256::digest(key.as_bytes())));
    Ok(name)
}

fn short_name(name: &str) -> &str {
    let digest = name.rsplit('.').next().unwrap_or(name);
    digest.get(..8).unwrap_or(digest)
}

fn record_ad(name: &str, key_id: &[u8]) -> Vec<u8> {
    let mut ad = Vec::with_capacity(name.len() + key_id.len());
    ad.extend_from_slice(name.as_bytes());
    ad.extend_from_slice(key_id);
    ad
}

fn seal_blob(data_key: &DataKey, name: &str, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
    let id = data_key.id();
    let sealed = data_key.seal(&record_ad(name, id), plaintext)?;
    let mut out = Vec::with_capacity(KEY_ID_LEN + sealed.len());
    out.extend_from_slice(id);
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn encode_record<R: Serialize>(record: &R) -> StorageResult<Vec<u8>> {
    let mut plaintext = Vec::new();
    ciborium::ser::into_writer(
        &StoredRecordRef {
            version: RECORD_VERSION,
            record,
        },
        &mut plaintext,
    )
    .map_err(|err| StorageError::Serialization(err.to_string()))?;
    Ok(plaintext)
}

fn decode_record<R: DeserializeOwned>(plaintext: &[u8]) -> StorageResult<R> {
    let stored: StoredRecord<R> = ciborium::de::from_reader(plaintext)
        .map_err(|err| StorageError::Corruption(format!("record decode: {err}")))?;
    if stored.version != RECORD_VERSION {
        return Err(StorageError::Corruption(format!(
            "unsupported record version {}",
            stored.version
        )));
    }
    Ok(stored.record)
}
