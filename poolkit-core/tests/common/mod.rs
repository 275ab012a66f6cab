//! Common test utilities shared across integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use poolkit_core::config::StorageConfig;
use poolkit_core::notes::{NoteEntry, NoteStatus};
use poolkit_core::storage::{
    DeviceKeystore, PoolStorage, SessionStorage, StorageError, StoragePaths,
};
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

pub struct InMemoryKeystore {
    key: [u8; 32],
}

impl InMemoryKeystore {
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }
}

impl Default for InMemoryKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceKeystore for InMemoryKeystore {
    fn seal(&self, associated_data: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce_bytes = [0u8; 24];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        let mut out = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open_sealed(
        &self,
        associated_data: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, StorageError> {
        if ciphertext.len() < 24 {
            return Err(StorageError::Keystore(
                "keystore ciphertext too short".to_string(),
            ));
        }
        let (nonce_bytes, payload) = ciphertext.split_at(24);
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        cipher
            .decrypt(
                XNonce::from_slice(nonce_bytes),
                Payload {
                    msg: payload,
                    aad: associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))
    }
}

pub fn temp_root() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("poolkit-test-{}", Uuid::new_v4()));
    path
}

pub fn test_config() -> StorageConfig {
    StorageConfig {
        cas_max_retries: 64,
        cas_min_delay_ms: 1,
        cas_max_delay_ms: 10,
        ..StorageConfig::default()
    }
}

#[allow(dead_code, reason = "used in tests")]
pub async fn open_unlocked(root: &Path, keystore: Arc<InMemoryKeystore>) -> PoolStorage {
    let storage = PoolStorage::open(StoragePaths::new(root), test_config()).expect("open");
    storage.unlock(keystore).await.expect("unlock");
    storage
}

#[allow(dead_code, reason = "used in tests")]
pub async fn in_memory_unlocked() -> PoolStorage {
    let storage = PoolStorage::in_memory(test_config()).expect("storage");
    storage
        .unlock(Arc::new(InMemoryKeystore::new()))
        .await
        .expect("unlock");
    storage
}

#[allow(dead_code, reason = "used in tests")]
pub fn unspent(id: &str, index: u64) -> NoteEntry {
    NoteEntry::new(id, index, index.to_be_bytes().to_vec(), NoteStatus::Unspent)
}

#[allow(dead_code, reason = "used in tests")]
pub fn cleanup_storage(root: &Path) {
    let _ = std::fs::remove_dir_all(root);
}
