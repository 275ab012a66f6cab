//! Error types for pool storage components.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the note cache, the deposit-index allocator and the
/// encrypted store underneath them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
pub enum StorageError {
    /// Transient failure of the backing store. Safe to retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decrypted or decoded.
    #[error("storage corruption: {0}")]
    Corruption(String),

    /// A deposit index commit would not advance the last used index.
    #[error("deposit index regression: attempted {attempted}, next candidate is {next}")]
    IndexRegression {
        /// Index the caller tried to commit.
        attempted: u64,
        /// Lowest index that would have been accepted.
        next: u64,
    },

    /// No session key is loaded, so nothing can be sealed or opened.
    #[error("encryption unavailable: session is locked")]
    EncryptionUnavailable,

    /// Errors coming from the device keystore.
    #[error("keystore error: {0}")]
    Keystore(String),

    /// AEAD failures while sealing.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Serialization failures on the write path.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid caller input (empty keys, malformed names).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    /// Returns `true` for failures the caller may retry as-is.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub(crate) fn map_io_err(err: &std::io::Error) -> StorageError {
    StorageError::Unavailable(err.to_string())
}
