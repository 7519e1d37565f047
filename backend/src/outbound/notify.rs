//! Delta notifier emitting structured `tracing` events.

use async_trait::async_trait;
use tracing::info;

use crate::domain::WatchEntry;
use crate::domain::ports::{DeltaNotifier, DeltaNotifierError, WatchlistChange};

/// Number of titles listed per direction in one event.
const SAMPLE_TITLES: usize = 5;

/// Logs every committed change at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDeltaNotifier;

fn sample(entries: &[WatchEntry]) -> Vec<&str> {
    entries
        .iter()
        .take(SAMPLE_TITLES)
        .map(|entry| entry.title.as_str())
        .collect()
}

#[async_trait]
impl DeltaNotifier for TracingDeltaNotifier {
    async fn notify(&self, change: &WatchlistChange) -> Result<(), DeltaNotifierError> {
        info!(
            watchlist_id = change.watchlist_id,
            account_id = change.account_id,
            site = %change.site,
            trigger = ?change.trigger,
            added = change.delta.added.len(),
            removed = change.delta.removed.len(),
            added_sample = ?sample(&change.delta.added),
            removed_sample = ?sample(&change.delta.removed),
            synced_at = %change.synced_at,
            "watch-list changed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::{SyncTrigger, WatchEntry, WatchlistDelta};

    #[tokio::test]
    async fn logging_never_fails() {
        let change = WatchlistChange {
            watchlist_id: 1,
            account_id: 2,
            site: "enwiki".to_owned(),
            delta: WatchlistDelta {
                added: (0..8).map(|i| WatchEntry::new(0, format!("Page {i}"))).collect(),
                removed: vec![WatchEntry::new(2, "User:Old")],
            },
            trigger: SyncTrigger::Scheduled,
            synced_at: Utc::now(),
        };

        assert_eq!(TracingDeltaNotifier.notify(&change).await, Ok(()));
        assert_eq!(sample(&change.delta.added).len(), SAMPLE_TITLES);
    }
}
