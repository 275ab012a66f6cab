//! Platform interfaces for pool storage.

use async_trait::async_trait;

use super::error::StorageResult;

/// Device keystore interface used to seal and open the session data key.
pub trait DeviceKeystore: Send + Sync {
    /// Seals plaintext under the device-bound key, authenticating `associated_data`.
    ///
    /// The associated data is not encrypted, but it is integrity-protected as part
    /// of the seal operation. Any mismatch when opening must fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the keystore refuses the operation or the seal fails.
    fn seal(&self, associated_data: &[u8], plaintext: &[u8]) -> StorageResult<Vec<u8>>;

    /// Opens ciphertext under the device-bound key, verifying `associated_data`.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails or the keystore cannot open.
    fn open_sealed(
        &self,
        associated_data: &[u8],
        ciphertext: &[u8],
    ) -> StorageResult<Vec<u8>>;
}

/// Origin-scoped blob store holding opaque encrypted records.
///
/// Writes MUST be atomic: a reader observes either the complete old content
/// or the complete new content, never a partial write.
#[async_trait]
pub trait AtomicBlobStore: Send + Sync {
    /// Reads the blob at `name`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes bytes atomically to `name`, replacing any existing content.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Replaces the blob at `name` with `bytes` only if its current content
    /// equals `expected` (`None` meaning the blob must be absent).
    ///
    /// Returns `false` without writing when the content changed since it was read.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read or write fails.
    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<&[u8]>,
        bytes: &[u8],
    ) -> StorageResult<bool>;

    /// Deletes the blob at `name`. Deleting a missing blob is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    async fn delete(&self, name: &str) -> StorageResult<()>;

    /// Lists the names of all blobs starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Checks if a blob exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    async fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.read(name).await?.is_some())
    }
}
