//! Driven port informing consumers about committed watch-list changes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::define_port_error;
use crate::domain::{SyncTrigger, WatchlistDelta};

/// A committed, non-empty change to one watch-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchlistChange {
    /// Watch-list id.
    pub watchlist_id: i64,
    /// Owning account id.
    pub account_id: i64,
    /// Site database name.
    pub site: String,
    /// Entries added and removed by the sync.
    pub delta: WatchlistDelta,
    /// What started the sync.
    pub trigger: SyncTrigger,
    /// Commit time.
    pub synced_at: DateTime<Utc>,
}

define_port_error! {
    /// Errors surfaced by delta consumers.
    pub enum DeltaNotifierError {
        /// The consumer could not accept the change.
        Delivery { message: String } =>
            "delta delivery failed: {message}",
    }
}

/// Port receiving committed deltas.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeltaNotifier: Send + Sync {
    /// Deliver one change. Failures never roll back the commit.
    async fn notify(&self, change: &WatchlistChange) -> Result<(), DeltaNotifierError>;
}

/// Notifier that drops every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpDeltaNotifier;

#[async_trait]
impl DeltaNotifier for NoOpDeltaNotifier {
    async fn notify(&self, _change: &WatchlistChange) -> Result<(), DeltaNotifierError> {
        Ok(())
    }
}
