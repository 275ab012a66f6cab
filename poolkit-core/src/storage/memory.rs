//! In-memory blob store.
//!
//! Useful for ephemeral wallets and tests. Contents do not survive the process.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::error::StorageResult;
use super::traits::AtomicBlobStore;

/// Blob store backed by an ordered in-memory map.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently held.
    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    /// Returns `true` if no blob is stored.
    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }
}

#[async_trait]
impl AtomicBlobStore for MemoryBlobStore {
    async fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.blobs.lock().await.get(name).cloned())
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> StorageResult<()> {
        self.blobs
            .lock()
            .await
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<&[u8]>,
        bytes: &[u8],
    ) -> StorageResult<bool> {
        let mut blobs = self.blobs.lock().await;
        if blobs.get(name).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        blobs.insert(name.to_string(), bytes.to_vec());
        drop(blobs);
        Ok(true)
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        self.blobs.lock().await.remove(name);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .blobs
            .lock()
            .await
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect())
    }
}
