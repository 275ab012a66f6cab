//! Incremental note sync against a paginated activity indexer.
//!
//! The indexer and the note discovery logic are injected; this module only
//! drives pagination from the cached cursor and merge-writes each page.

use std::sync::Arc;

use async_trait::async_trait;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::config::StorageConfig;
use crate::notes::{Cursor, NoteEntry};
use crate::storage::{NoteStorage, StorageError};

/// Errors surfaced by [`SyncContext::sync_notes`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// The indexer request failed.
    #[error("indexer error: {0}")]
    Indexer(String),
    /// Events could not be turned into notes.
    #[error("note discovery error: {0}")]
    Discovery(String),
    /// Reading or writing the note cache failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Order in which the indexer returns activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SortOrder {
    /// Oldest first.
    Asc,
    /// Newest first.
    Desc,
}

/// Pagination metadata of one page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageInfo {
    /// Whether more activity follows this page.
    pub has_next_page: bool,
    /// Cursor of the last event in this page.
    pub end_cursor: Option<Cursor>,
}

/// One page of raw indexer events.
#[derive(Debug, Clone)]
pub struct ActivityPage<E> {
    /// Events in indexer order.
    pub events: Vec<E>,
    /// Where the page ends.
    pub page_info: PageInfo,
}

/// Source of pool activity.
#[async_trait]
pub trait ActivityIndexer: Send + Sync {
    /// Raw event type of this indexer.
    type Event: Send + Sync;

    /// Fetches up to `limit` events after `cursor`.
    async fn fetch_activity(
        &self,
        pool_address: &str,
        limit: u32,
        cursor: Option<&Cursor>,
        order: SortOrder,
    ) -> Result<ActivityPage<Self::Event>, SyncError>;
}

/// Picks the notes owned by a public key out of raw events.
pub trait NoteDiscoverer<E>: Send + Sync {
    /// Returns the notes in `events` that belong to `public_key`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Discovery`] on malformed events.
    fn discover(&self, public_key: &str, events: &[E]) -> Result<Vec<NoteEntry>, SyncError>;
}

/// Outcome of one [`SyncContext::sync_notes`] call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Pages fetched.
    pub pages: u32,
    /// Notes handed to the cache across all pages.
    pub notes_seen: usize,
    /// Cursor the next sync will resume from.
    pub cursor: Option<Cursor>,
}

/// Indexer, discovery logic and paging limits for note sync.
pub struct SyncContext<I, D> {
    indexer: Arc<I>,
    discoverer: Arc<D>,
    page_size: u32,
    max_pages: u32,
}

impl<I, D> std::fmt::Debug for SyncContext<I, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages)
            .finish_non_exhaustive()
    }
}

impl<I, D> SyncContext<I, D>
where
    I: ActivityIndexer,
    D: NoteDiscoverer<I::Event>,
{
    /// Creates a context fetching `page_size` events per page, at most
    /// `max_pages` pages per call. Zero values are raised to one.
    #[must_use]
    pub fn new(indexer: Arc<I>, discoverer: Arc<D>, page_size: u32, max_pages: u32) -> Self {
        Self {
            indexer,
            discoverer,
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
        }
    }

    /// Creates a context with the paging limits of `config`.
    #[must_use]
    pub fn from_config(indexer: Arc<I>, discoverer: Arc<D>, config: &StorageConfig) -> Self {
        Self::new(
            indexer,
            discoverer,
            config.sync_page_size,
            config.sync_max_pages,
        )
    }

    /// Fetches activity after the cached cursor and merges it into `storage`.
    ///
    /// Each page is persisted before the next is requested, so a failure
    /// keeps every completed page and the next call resumes after it.
    ///
    /// # Errors
    ///
    /// The first indexer, discovery or storage error.
    pub async fn sync_notes<S>(
        &self,
        storage: &S,
        public_key: &str,
        pool_address: &str,
    ) -> Result<SyncReport, SyncError>
    where
        S: NoteStorage + ?Sized,
    {
        let mut cursor = storage
            .get_cached_notes(public_key, pool_address)
            .await?
            .and_then(|cached| cached.last_processed_cursor);
        let mut report = SyncReport::default();

        while report.pages < self.max_pages {
            let page = self
                .indexer
                .fetch_activity(pool_address, self.page_size, cursor.as_ref(), SortOrder::Asc)
                .await?;
            let notes = self.discoverer.discover(public_key, &page.events)?;
            report.pages += 1;
            report.notes_seen += notes.len();

            let PageInfo {
                has_next_page,
                end_cursor,
            } = page.page_info;
            log::debug!(
                "synced page {} with {} events, {} notes",
                report.pages,
                page.events.len(),
                notes.len()
            );
            storage
                .store_discovered_notes(public_key, pool_address, notes, end_cursor.clone())
                .await?;

            match end_cursor {
                Some(end) => cursor = Some(end),
                None if has_next_page => {
                    log::warn!("indexer reported a next page without an end cursor");
                    break;
                }
                None => {}
            }
            if !has_next_page {
                break;
            }
        }

        log::info!(
            "note sync finished: {} pages, {} notes",
            report.pages,
            report.notes_seen
        );
        report.cursor = cursor;
        Ok(report)
    }
}
