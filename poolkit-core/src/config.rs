//! Runtime configuration for pool storage and sync.

use std::time::Duration;

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};

use crate::storage::{StorageError, StorageResult};

/// Tunables shared by the storage façade and the sync driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Retries of a conflicting compare-and-swap before giving up
    /// (total attempts = retries + 1).
    pub cas_max_retries: u32,
    /// First backoff delay between conflicting attempts, in milliseconds.
    pub cas_min_delay_ms: u64,
    /// Upper bound on the backoff delay, in milliseconds.
    pub cas_max_delay_ms: u64,
    /// Next deposit index reported for a pair that was never committed.
    pub deposit_index_baseline: u64,
    /// Page size requested from the indexer.
    pub sync_page_size: u32,
    /// Pages fetched per sync call before yielding back to the caller.
    pub sync_max_pages: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cas_max_retries: 8,
            cas_min_delay_ms: 5,
            cas_max_delay_ms: 250,
            deposit_index_baseline: 0,
            sync_page_size: 100,
            sync_max_pages: 50,
        }
    }
}

impl StorageConfig {
    /// Parses a JSON object; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidInput`] on malformed JSON or values.
    pub fn from_json(json: &str) -> StorageResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| StorageError::InvalidInput(format!("storage config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidInput`] describing the first violation.
    pub fn validate(&self) -> StorageResult<()> {
        if self.cas_min_delay_ms > self.cas_max_delay_ms {
            return Err(StorageError::InvalidInput(
                "cas_min_delay_ms exceeds cas_max_delay_ms".to_string(),
            ));
        }
        if self.sync_page_size == 0 || self.sync_max_pages == 0 {
            return Err(StorageError::InvalidInput(
                "sync page size and page cap must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn cas_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.cas_min_delay_ms))
            .with_max_delay(Duration::from_millis(self.cas_max_delay_ms))
            .with_max_times(self.cas_max_retries as usize)
            .with_jitter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            StorageConfig::from_json(r#"{"deposit_index_baseline": 7}"#).expect("parse");
        assert_eq!(config.deposit_index_baseline, 7);
        assert_eq!(config.cas_max_retries, StorageConfig::default().cas_max_retries);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            StorageConfig::from_json(r#"{"cas_min_delay_ms": 10, "cas_max_delay_ms": 1}"#),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(
            StorageConfig::from_json(r#"{"sync_page_size": 0}"#),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(
            StorageConfig::from_json("not json"),
            Err(StorageError::InvalidInput(_))
        ));
    }
}
