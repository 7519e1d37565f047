//! Diff-based mirroring of remote watch-lists into local storage.
//!
//! One sync of one watch-list:
//!
//! 1. load the local mirror and, concurrently, pull the remote list page by
//!    page until the continuation token runs out, keeping subject namespaces
//!    only;
//! 2. diff the two sets;
//! 3. hand the batched delta to the repository, which applies it in one
//!    transaction;
//! 4. tell the [`DeltaNotifier`] about non-empty deltas.
//!
//! A failure at any step abandons that watch-list's sync. Partially pulled
//! pages are discarded and nothing is retried; the next tick tries again.

mod batches;

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::{join_all, try_join};
use mockable::Clock;
use tracing::{debug, info, warn};

use crate::domain::namespaces::NamespaceCatalog;
use crate::domain::ports::{
    AccessTokenError, AccessTokenProvider, DeltaCommit, DeltaNotifier, WatchlistChange,
    WatchlistFetch, WatchlistRepository, WatchlistRepositoryError, WatchlistSource,
    WatchlistSourceError,
};
use crate::domain::request_queue::QueuePriority;
use crate::domain::{SyncTrigger, WatchEntry, WatchlistDelta, WatchlistRecord, content_hash};

pub use batches::{DeltaPlan, MAX_ROWS_PER_STATEMENT, PageRow};

/// Errors failing the sync of one watch-list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchlistSyncError {
    /// Local storage failed.
    #[error(transparent)]
    Repository(#[from] WatchlistRepositoryError),
    /// The remote list could not be read.
    #[error(transparent)]
    Source(#[from] WatchlistSourceError),
    /// No bearer token was available for the owner.
    #[error(transparent)]
    Token(#[from] AccessTokenError),
    /// The requested watch-list does not exist.
    #[error("watch-list {watchlist_id} not found")]
    NotFound {
        /// Identifier of the missing watch-list.
        watchlist_id: i64,
    },
}

/// Port bundle required by the synchronizer.
pub struct WatchlistSyncPorts {
    /// Local mirror storage.
    pub repository: Arc<dyn WatchlistRepository>,
    /// Remote watch-list reader.
    pub source: Arc<dyn WatchlistSource>,
    /// Bearer token provider.
    pub tokens: Arc<dyn AccessTokenProvider>,
    /// Delta consumer.
    pub notifier: Arc<dyn DeltaNotifier>,
}

impl WatchlistSyncPorts {
    /// Build a strongly-typed port bundle.
    pub fn new(
        repository: Arc<dyn WatchlistRepository>,
        source: Arc<dyn WatchlistSource>,
        tokens: Arc<dyn AccessTokenProvider>,
        notifier: Arc<dyn DeltaNotifier>,
    ) -> Self {
        Self {
            repository,
            source,
            tokens,
            notifier,
        }
    }
}

/// Summary of one successful watch-list sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Watch-list id.
    pub watchlist_id: i64,
    /// Entries added to the mirror.
    pub added: usize,
    /// Entries removed from the mirror.
    pub removed: usize,
    /// Remote pages fetched.
    pub pages_fetched: usize,
}

/// Result of one scheduled pass over every due watch-list.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Watch-lists synced successfully.
    pub synced: Vec<SyncOutcome>,
    /// Watch-lists whose sync failed, with the reason.
    pub failed: Vec<(i64, WatchlistSyncError)>,
}

struct RemoteList {
    entries: HashSet<WatchEntry>,
    pages: usize,
}

/// Keeps local watch-list mirrors in step with their remote lists.
pub struct WatchlistSynchronizer {
    ports: WatchlistSyncPorts,
    namespaces: NamespaceCatalog,
    clock: Arc<dyn Clock>,
}

impl WatchlistSynchronizer {
    /// Build a synchronizer with an empty namespace cache.
    pub fn new(ports: WatchlistSyncPorts, clock: Arc<dyn Clock>) -> Self {
        let namespaces = NamespaceCatalog::new(ports.source.clone());
        Self {
            ports,
            namespaces,
            clock,
        }
    }

    /// Sync every due watch-list concurrently through the background queue.
    ///
    /// One watch-list failing is logged and reported without affecting the
    /// others.
    ///
    /// # Errors
    ///
    /// Returns an error only when the list of watch-lists cannot be loaded.
    pub async fn update_all(&self) -> Result<SyncReport, WatchlistSyncError> {
        let now = self.clock.utc();
        let due: Vec<WatchlistRecord> = self
            .ports
            .repository
            .list_watchlists()
            .await?
            .into_iter()
            .filter(|record| record.is_due(now))
            .collect();
        debug!(due = due.len(), "scheduled watch-list pass");

        let results = join_all(
            due.iter()
                .map(|record| self.sync_record(record, SyncTrigger::Scheduled)),
        )
        .await;

        let mut report = SyncReport::default();
        for (record, result) in due.iter().zip(results) {
            match result {
                Ok(outcome) => report.synced.push(outcome),
                Err(error) => {
                    warn!(watchlist_id = record.id, site = %record.site, %error, "watch-list sync failed");
                    report.failed.push((record.id, error));
                }
            }
        }
        info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            "scheduled watch-list pass finished"
        );
        Ok(report)
    }

    /// Sync one watch-list now through the foreground queue, whether due or
    /// not, and stamp its manual-sync time.
    ///
    /// # Errors
    ///
    /// Returns [`WatchlistSyncError::NotFound`] for an unknown id and any
    /// failure of the sync itself.
    pub async fn update_one(&self, watchlist_id: i64) -> Result<SyncOutcome, WatchlistSyncError> {
        let record = self
            .ports
            .repository
            .find_watchlist(watchlist_id)
            .await?
            .ok_or(WatchlistSyncError::NotFound { watchlist_id })?;
        self.sync_record(&record, SyncTrigger::Manual).await
    }

    async fn sync_record(
        &self,
        record: &WatchlistRecord,
        trigger: SyncTrigger,
    ) -> Result<SyncOutcome, WatchlistSyncError> {
        let priority = QueuePriority::from(trigger);
        let load_local = async {
            self.ports
                .repository
                .load_mirror(record.id)
                .await
                .map_err(WatchlistSyncError::from)
        };
        let (local, remote) = try_join(load_local, self.pull_remote(record, priority)).await?;

        let delta = WatchlistDelta::between(&local, &remote.entries);
        let commit = DeltaCommit {
            watchlist_id: record.id,
            plan: DeltaPlan::build(&record.site, &delta),
            synced_at: self.clock.utc(),
            trigger,
            content_hash: content_hash(&remote.entries),
        };
        self.ports.repository.apply_delta(&commit).await?;

        let outcome = SyncOutcome {
            watchlist_id: record.id,
            added: delta.added.len(),
            removed: delta.removed.len(),
            pages_fetched: remote.pages,
        };
        info!(
            watchlist_id = record.id,
            site = %record.site,
            added = outcome.added,
            removed = outcome.removed,
            statements = commit.plan.statement_count(),
            ?trigger,
            "watch-list synced"
        );

        if !delta.is_empty() {
            let change = WatchlistChange {
                watchlist_id: record.id,
                account_id: record.account_id,
                site: record.site.clone(),
                delta,
                trigger,
                synced_at: commit.synced_at,
            };
            if let Err(error) = self.ports.notifier.notify(&change).await {
                warn!(watchlist_id = record.id, %error, "delta notification failed");
            }
        }
        Ok(outcome)
    }

    async fn pull_remote(
        &self,
        record: &WatchlistRecord,
        priority: QueuePriority,
    ) -> Result<RemoteList, WatchlistSyncError> {
        let bearer_token = self.ports.tokens.bearer_token(record.account_id).await?;
        let namespaces = self
            .namespaces
            .namespaces(&record.site, priority)
            .await?
            .subject_ids();

        let mut entries = HashSet::new();
        let mut continuation = None;
        let mut pages = 0;
        loop {
            let request = WatchlistFetch {
                site: record.site.clone(),
                bearer_token: bearer_token.clone(),
                namespaces: namespaces.clone(),
                continuation: continuation.take(),
                priority,
            };
            let batch = self.ports.source.fetch_watchlist_batch(&request).await?;
            pages += 1;
            entries.extend(batch.entries.into_iter().filter(WatchEntry::is_subject));
            match batch.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        debug!(
            watchlist_id = record.id,
            pages,
            entries = entries.len(),
            "remote watch-list pulled"
        );
        Ok(RemoteList { entries, pages })
    }
}
