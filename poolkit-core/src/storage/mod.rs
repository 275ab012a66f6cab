//! Encrypted persistence: blob backends, session key handling and the
//! storage façade the rest of the wallet depends on.

pub mod capabilities;
pub mod encrypted;
mod envelope;
pub mod error;
pub mod facade;
pub mod fs;
pub mod keys;
pub mod lock;
pub mod memory;
pub mod paths;
pub mod session;
pub mod traits;

#[cfg(test)]
pub(crate) mod tests_utils;

use std::time::{SystemTime, UNIX_EPOCH};

pub use capabilities::{DepositIndexStorage, NoteStorage, SessionStorage};
pub use encrypted::EncryptedStore;
pub use error::{StorageError, StorageResult};
pub use facade::{AccountStorage, PoolStorage};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use paths::StoragePaths;
pub use session::Session;
pub use traits::{AtomicBlobStore, DeviceKeystore};

/// Reserved blob name of the key envelope. Contains non-hex characters, so it
/// can never collide with a namespaced record name.
pub(crate) const KEY_ENVELOPE_NAME: &str = "keys.envelope";
pub(crate) const KEY_ENVELOPE_AD: &[u8] = b"poolkit:session-key-envelope";

pub(crate) fn unix_now() -> StorageResult<u64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| {
            StorageError::Unavailable(format!("system time before unix epoch: {err}"))
        })?;
    Ok(duration.as_secs())
}

/// Record key of one (public key, pool address) pair. Length-prefixed so no
/// two pairs can map to the same key.
pub(crate) fn pair_record_key(
    kind: &str,
    public_key: &str,
    pool_address: &str,
) -> StorageResult<String> {
    if public_key.is_empty() || pool_address.is_empty() {
        return Err(StorageError::InvalidInput(
            "public key and pool address must be non-empty".to_string(),
        ));
    }
    Ok(format!(
        "{kind}:{}:{public_key}:{pool_address}",
        public_key.len()
    ))
}
