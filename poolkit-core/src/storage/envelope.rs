//! Session key envelope persistence helpers.

use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use super::keys::KeyId;

const ENVELOPE_VERSION: u32 = 1;

/// Device-wrapped data key, stored outside every account namespace.
///
/// `key_id` names the key generation. Every record carries it, so a record
/// sealed before a wipe is told apart from one sealed after it.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyEnvelope {
    pub version: u32,
    pub key_id: KeyId,
    pub wrapped_data_key: Vec<u8>,
    pub created_at: u64,
}

impl KeyEnvelope {
    pub const fn new(key_id: KeyId, wrapped_data_key: Vec<u8>, now: u64) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            key_id,
            wrapped_data_key,
            created_at: now,
        }
    }

    pub fn serialize(&self) -> StorageResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(bytes)
    }

    pub fn deserialize(bytes: &[u8]) -> StorageResult<Self> {
        let envelope: Self = ciborium::de::from_reader(bytes)
            .map_err(|err| StorageError::Corruption(format!("key envelope: {err}")))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(StorageError::Corruption(format!(
                "unsupported key envelope version {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}
