//! Session data key: unwrapping via the device keystore and record sealing.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    envelope::KeyEnvelope,
    error::{StorageError, StorageResult},
    traits::{AtomicBlobStore, DeviceKeystore},
    KEY_ENVELOPE_AD, KEY_ENVELOPE_NAME,
};

const NONCE_SIZE: usize = 24;

/// Length of a [`KeyId`] in bytes.
pub const KEY_ID_LEN: usize = 16;

/// Random identifier of one data key generation, stored in the key envelope.
pub type KeyId = [u8; KEY_ID_LEN];

/// Symmetric key sealing every record at rest.
///
/// Held only in memory for the lifetime of a session and zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    key: [u8; 32],
    id: KeyId,
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("key", &"[REDACTED]")
            .field("id", &hex::encode(self.id))
            .finish()
    }
}

impl DataKey {
    fn generate() -> Self {
        let mut key = [0u8; 32];
        let mut id = [0u8; KEY_ID_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut id);
        Self { key, id }
    }

    fn from_slice(bytes: &[u8], id: KeyId) -> StorageResult<Self> {
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            StorageError::Corruption(format!(
                "data key length mismatch: expected 32, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { key, id })
    }

    /// Generation of this key, as recorded in the key envelope.
    #[must_use]
    pub const fn id(&self) -> &KeyId {
        &self.id
    }

    /// Opens the data key wrapped in the key envelope, creating and persisting
    /// a fresh one when no envelope exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be read, opened or parsed, or
    /// if persisting a new envelope fails.
    pub async fn unlock(
        keystore: &dyn DeviceKeystore,
        blob_store: &dyn AtomicBlobStore,
        now: u64,
    ) -> StorageResult<Self> {
        if let Some(bytes) = blob_store.read(KEY_ENVELOPE_NAME).await? {
            return Self::open_envelope(keystore, &bytes);
        }

        let key = Self::generate();
        let wrapped = keystore.seal(KEY_ENVELOPE_AD, &key.key)?;
        let envelope = KeyEnvelope::new(key.id, wrapped, now).serialize()?;
        if blob_store
            .compare_and_swap(KEY_ENVELOPE_NAME, None, &envelope)
            .await?
        {
            log::info!("created new session key envelope");
            return Ok(key);
        }

        // Another writer created the envelope first; adopt theirs.
        let bytes = blob_store.read(KEY_ENVELOPE_NAME).await?.ok_or_else(|| {
            StorageError::Unavailable("key envelope vanished during unlock".to_string())
        })?;
        Self::open_envelope(keystore, &bytes)
    }

    fn open_envelope(keystore: &dyn DeviceKeystore, bytes: &[u8]) -> StorageResult<Self> {
        let envelope = KeyEnvelope::deserialize(bytes)?;
        let mut raw = keystore.open_sealed(KEY_ENVELOPE_AD, &envelope.wrapped_data_key)?;
        let key = Self::from_slice(&raw, envelope.key_id);
        raw.zeroize();
        key
    }

    /// Seals `plaintext` bound to `associated_data`. Output is `nonce || ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns an error if the AEAD refuses the input.
    pub fn seal(&self, associated_data: &[u8], plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Opens a blob produced by [`DataKey::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corruption`] on truncated input, a foreign key,
    /// tampered bytes or mismatched associated data.
    pub fn open(&self, associated_data: &[u8], sealed: &[u8]) -> StorageResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE {
            return Err(StorageError::Corruption("sealed record too short".to_string()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| {
                StorageError::Corruption("record failed authentication".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBlobStore;
    use crate::storage::tests_utils::InMemoryKeystore;

    #[tokio::test]
    async fn test_unlock_round_trip() {
        let keystore = InMemoryKeystore::new();
        let blob_store = MemoryBlobStore::new();
        let first = DataKey::unlock(&keystore, &blob_store, 100).await.expect("unlock");
        let second = DataKey::unlock(&keystore, &blob_store, 200).await.expect("unlock");
        assert_eq!(first.key, second.key);
        assert_eq!(first.id(), second.id());

        let sealed = first.seal(b"ad", b"payload").expect("seal");
        assert_eq!(second.open(b"ad", &sealed).expect("open"), b"payload");
    }

    #[tokio::test]
    async fn test_unlock_with_other_keystore_fails() {
        let blob_store = MemoryBlobStore::new();
        DataKey::unlock(&InMemoryKeystore::new(), &blob_store, 1)
            .await
            .expect("unlock");

        match DataKey::unlock(&InMemoryKeystore::new(), &blob_store, 2).await {
            Err(StorageError::Crypto(_) | StorageError::Keystore(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn test_new_envelope_gets_new_id() {
        let keystore = InMemoryKeystore::new();
        let blob_store = MemoryBlobStore::new();
        let first = DataKey::unlock(&keystore, &blob_store, 1).await.expect("unlock");
        blob_store.delete(KEY_ENVELOPE_NAME).await.expect("delete");
        let second = DataKey::unlock(&keystore, &blob_store, 2).await.expect("unlock");
        assert_ne!(first.id(), second.id());
        assert_ne!(first.key, second.key);
    }

    #[test]
    fn test_open_rejects_wrong_associated_data_and_tampering() {
        let key = DataKey::generate();
        let mut sealed = key.seal(b"name-a", b"secret").expect("seal");
        assert!(matches!(
            key.open(b"name-b", &sealed),
            Err(StorageError::Corruption(_))
        ));
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            key.open(b"name-a", &sealed),
            Err(StorageError::Corruption(_))
        ));
        assert!(matches!(
            key.open(b"name-a", &sealed[..10]),
            Err(StorageError::Corruption(_))
        ));
    }
}
