//! Client-side persistence for privacy-pool wallets.
//!
//! `poolkit-core` keeps two kinds of per-account state in an encrypted,
//! origin-scoped blob store:
//!
//! - the **note cache**: notes discovered for a (public key, pool address)
//!   pair together with the indexer cursor sync resumes from;
//! - the **deposit index allocator**: the last deposit index confirmed as
//!   used, from which the next candidate is derived.
//!
//! Both are reached through [`storage::PoolStorage`], which owns the session
//! key and implements the [`NoteStorage`], [`DepositIndexStorage`] and
//! [`SessionStorage`] capabilities. Every mutation is an optimistic
//! compare-and-swap, so concurrent tasks, threads and processes sharing one
//! store never lose updates or hand out a deposit index twice.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use poolkit_core::config::StorageConfig;
//! use poolkit_core::storage::{
//!     DepositIndexStorage, DeviceKeystore, PoolStorage, SessionStorage, StoragePaths,
//! };
//!
//! # async fn run(keystore: Arc<dyn DeviceKeystore>) -> Result<(), poolkit_core::storage::StorageError> {
//! let storage = PoolStorage::open(StoragePaths::new("/tmp/wallet"), StorageConfig::default())?;
//! storage.unlock(keystore).await?;
//!
//! let account = storage.account("main")?;
//! let index = account.get_next_deposit_index("0xpub", "0xpool").await?;
//! // ... build and submit the deposit ...
//! account.update_last_used_deposit_index("0xpub", "0xpool", index).await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod config;
pub mod deposit;
pub mod hydration;
pub mod logger;
pub mod notes;
pub mod storage;
pub mod sync;

pub use config::StorageConfig;
pub use deposit::{DepositIndexRecord, DepositIndexState};
pub use hydration::{hydrate_notes, spawn_hydration, Hydration, LoadState};
pub use notes::{Cursor, CursorOrder, DiscoveryResult, NoteChain, NoteEntry, NoteStatus};
pub use storage::{
    AccountStorage, DepositIndexStorage, NoteStorage, PoolStorage, SessionStorage, StorageError,
    StorageResult,
};
pub use sync::{SyncContext, SyncError, SyncReport};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("poolkit_core");
