//! Driven port for the local watch-list mirror.
//!
//! The repository owns the transaction boundary: one [`DeltaCommit`] is
//! applied atomically or not at all.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::define_port_error;
use crate::domain::watchlist_sync::DeltaPlan;
use crate::domain::{SyncTrigger, WatchEntry, WatchlistRecord};

/// Everything needed to commit one sync of one watch-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaCommit {
    /// Watch-list being updated.
    pub watchlist_id: i64,
    /// Batched row changes.
    pub plan: DeltaPlan,
    /// Time the remote state was observed.
    pub synced_at: DateTime<Utc>,
    /// What started the sync; manual syncs also stamp the manual timestamp.
    pub trigger: SyncTrigger,
    /// Hash of the full remote entry list.
    pub content_hash: Vec<u8>,
}

define_port_error! {
    /// Errors surfaced by watch-list persistence adapters.
    pub enum WatchlistRepositoryError {
        /// No storage connection could be obtained.
        Connection { message: String } =>
            "watch-list repository connection failed: {message}",
        /// A statement failed; the surrounding transaction was rolled back.
        Query { message: String } =>
            "watch-list repository query failed: {message}",
        /// The watch-list row vanished between load and commit.
        NotFound { watchlist_id: i64 } =>
            "watch-list {watchlist_id} not found",
    }
}

/// Port for reading and mutating mirrored watch-lists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatchlistRepository: Send + Sync {
    /// List every configured watch-list.
    async fn list_watchlists(&self) -> Result<Vec<WatchlistRecord>, WatchlistRepositoryError>;

    /// Load one watch-list by id.
    async fn find_watchlist(
        &self,
        watchlist_id: i64,
    ) -> Result<Option<WatchlistRecord>, WatchlistRepositoryError>;

    /// Load the mirrored entries of one watch-list.
    async fn load_mirror(
        &self,
        watchlist_id: i64,
    ) -> Result<HashSet<WatchEntry>, WatchlistRepositoryError>;

    /// Apply one delta inside a single transaction.
    async fn apply_delta(&self, commit: &DeltaCommit) -> Result<(), WatchlistRepositoryError>;
}
