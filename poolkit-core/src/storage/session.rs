//! In-memory session state holding the unlocked data key.

use std::sync::{Arc, PoisonError, RwLock};

use super::error::{StorageError, StorageResult};
use super::keys::{DataKey, KeyId};
use super::traits::{AtomicBlobStore, DeviceKeystore};
use super::unix_now;

struct Unlocked {
    keystore: Arc<dyn DeviceKeystore>,
    key: Arc<DataKey>,
}

/// Volatile session: the data key lives here and nowhere else.
#[derive(Default)]
pub struct Session {
    state: RwLock<Option<Unlocked>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}

impl Session {
    /// Creates a locked session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (or creates) the key envelope in `blobs` with `keystore` and
    /// keeps the data key in memory.
    ///
    /// # Errors
    ///
    /// Returns the keystore error if the envelope does not open, or the
    /// backend error if it cannot be read or written.
    pub async fn unlock(
        &self,
        keystore: Arc<dyn DeviceKeystore>,
        blobs: &dyn AtomicBlobStore,
    ) -> StorageResult<()> {
        let key = DataKey::unlock(keystore.as_ref(), blobs, unix_now()?).await?;
        *self.state.write().map_err(|_| poisoned())? = Some(Unlocked {
            keystore,
            key: Arc::new(key),
        });
        log::info!("session unlocked");
        Ok(())
    }

    /// Locks the session if it still holds the key generation `id`.
    ///
    /// Called when the stored envelope no longer matches the loaded key,
    /// meaning another handle wiped the store. A newer key loaded in the
    /// meantime is kept.
    pub(crate) fn forget(&self, id: &KeyId) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let stale = state
            .as_ref()
            .is_some_and(|unlocked| unlocked.key.id() == id);
        if stale {
            *state = None;
        }
        drop(state);
        if stale {
            log::warn!("key envelope replaced by another handle, session locked until unlocked again");
        }
    }

    /// Drops the data key and the keystore handle. Persisted blobs are untouched.
    ///
    /// Operations already holding the key finish; new ones fail closed.
    pub fn clear(&self) {
        match self.state.write() {
            Ok(mut state) => *state = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        log::info!("session cleared");
    }

    /// Returns `true` while a data key is loaded.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.state.read().is_ok_and(|state| state.is_some())
    }

    /// The keystore the session was unlocked with, if any.
    pub(crate) fn keystore(&self) -> Option<Arc<dyn DeviceKeystore>> {
        self.state
            .read()
            .ok()?
            .as_ref()
            .map(|unlocked| Arc::clone(&unlocked.keystore))
    }

    /// Returns the data key or [`StorageError::EncryptionUnavailable`].
    pub(crate) fn data_key(&self) -> StorageResult<Arc<DataKey>> {
        self.state
            .read()
            .map_err(|_| poisoned())?
            .as_ref()
            .map(|unlocked| Arc::clone(&unlocked.key))
            .ok_or(StorageError::EncryptionUnavailable)
    }
}

fn poisoned() -> StorageError {
    StorageError::Unavailable("session lock poisoned".to_string())
}
