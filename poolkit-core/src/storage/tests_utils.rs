//! Test helpers for pool storage.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};

use super::error::{StorageError, StorageResult};
use super::memory::MemoryBlobStore;
use super::traits::{AtomicBlobStore, DeviceKeystore};

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
    fn seal(&self, associated_data: &[u8], plaintext: &[u8]) -> StorageResult<Vec<u8>> {
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
    ) -> StorageResult<Vec<u8>> {
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

/// Memory store with switchable write failures, injected CAS conflicts and
/// a budget of successful deletes.
#[derive(Default)]
pub struct FaultyBlobStore {
    inner: MemoryBlobStore,
    fail_writes: AtomicBool,
    conflicts_left: AtomicUsize,
    deletes_left: Mutex<Option<usize>>,
}

impl FaultyBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The next `count` compare-and-swap calls report a conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.conflicts_left.store(count, Ordering::SeqCst);
    }

    /// Lets `count` more deletes through, then fails every delete. `None`
    /// lifts the limit.
    pub fn fail_deletes_after(&self, count: Option<usize>) {
        *self.deletes_left.lock().expect("delete budget") = count;
    }

    fn take_delete(&self) -> StorageResult<()> {
        let mut left = self.deletes_left.lock().expect("delete budget");
        let allowed = match left.as_mut() {
            Some(0) => false,
            Some(count) => {
                *count -= 1;
                true
            }
            None => true,
        };
        drop(left);
        if allowed {
            Ok(())
        } else {
            Err(StorageError::Unavailable("device busy".to_string()))
        }
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("disk full".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AtomicBlobStore for FaultyBlobStore {
    async fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.read(name).await
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        self.inner.write_atomic(name, bytes).await
    }

    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<&[u8]>,
        bytes: &[u8],
    ) -> StorageResult<bool> {
        self.check_writable()?;
        let injected = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Ok(false);
        }
        self.inner.compare_and_swap(name, expected, bytes).await
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.take_delete()?;
        self.inner.delete(name).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }
}
