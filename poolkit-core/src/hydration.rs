//! Background loads observable as a tagged state.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::notes::DiscoveryResult;
use crate::storage::{NoteStorage, StorageError, StorageResult};

/// Progress of a background load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState<T> {
    /// Still running.
    Loading,
    /// Finished with data.
    Ready(T),
    /// Finished with an error. Never replaced by empty data.
    Failed(StorageError),
}

impl<T> LoadState<T> {
    /// Whether the load has finished either way.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !matches!(self, Self::Loading)
    }
}

/// Receiving end of a background load.
#[derive(Debug, Clone)]
pub struct Hydration<T> {
    rx: watch::Receiver<LoadState<T>>,
}

impl<T: Clone + Send + Sync> Hydration<T> {
    /// Snapshot of the current state.
    #[must_use]
    pub fn current(&self) -> LoadState<T> {
        self.rx.borrow().clone()
    }

    /// Waits until the load settles and returns the final state.
    ///
    /// If the loading task was dropped before settling the state reads as
    /// [`LoadState::Failed`].
    pub async fn settled(mut self) -> LoadState<T> {
        self.rx.wait_for(LoadState::is_settled).await.map_or_else(
            |_| {
                LoadState::Failed(StorageError::Unavailable(
                    "hydration task ended without a result".to_string(),
                ))
            },
            |state| state.clone(),
        )
    }
}

/// Runs `load` on the tokio runtime and exposes its progress.
///
/// Must be called from within a runtime.
#[must_use]
pub fn spawn_hydration<T, F>(load: F) -> Hydration<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = StorageResult<T>> + Send + 'static,
{
    let (tx, rx) = watch::channel(LoadState::Loading);
    tokio::spawn(async move {
        let state = match load.await {
            Ok(value) => LoadState::Ready(value),
            Err(err) => {
                log::warn!("hydration failed: {err}");
                LoadState::Failed(err)
            }
        };
        // Nobody listening is fine.
        let _ = tx.send(state);
    });
    Hydration { rx }
}

/// Loads the cached notes of one pair in the background.
#[must_use]
pub fn hydrate_notes(
    storage: Arc<dyn NoteStorage>,
    public_key: String,
    pool_address: String,
) -> Hydration<Option<DiscoveryResult>> {
    spawn_hydration(async move {
        storage
            .get_cached_notes(&public_key, &pool_address)
            .await
    })
}
