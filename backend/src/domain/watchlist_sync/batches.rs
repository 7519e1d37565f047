//! Splitting a delta into statement-sized batches.

use crate::domain::{PageId, WatchEntry, WatchlistDelta};

/// Upper bound on rows touched by one write statement.
pub const MAX_ROWS_PER_STATEMENT: usize = 1000;

/// One entry together with its derived page id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRow {
    /// Deterministic page id.
    pub id: PageId,
    /// The watched entry.
    pub entry: WatchEntry,
}

/// Delta rows grouped into batches of at most [`MAX_ROWS_PER_STATEMENT`].
///
/// Every removed batch becomes one relation delete. Every added batch becomes
/// one page insert-or-ignore followed by one relation insert.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeltaPlan {
    /// Batches of rows whose relation must be deleted.
    pub removed: Vec<Vec<PageRow>>,
    /// Batches of rows whose page and relation must be inserted.
    pub added: Vec<Vec<PageRow>>,
}

impl DeltaPlan {
    /// Plan the writes for `delta` on `site`.
    ///
    /// # Examples
    /// ```
    /// use watchlist_backend::domain::{WatchEntry, WatchlistDelta};
    /// use watchlist_backend::domain::watchlist_sync::DeltaPlan;
    ///
    /// let delta = WatchlistDelta {
    ///     added: (0..2500).map(|i| WatchEntry::new(0, format!("Page {i}"))).collect(),
    ///     removed: Vec::new(),
    /// };
    /// let plan = DeltaPlan::build("enwiki", &delta);
    /// let sizes: Vec<usize> = plan.added.iter().map(Vec::len).collect();
    /// assert_eq!(sizes, vec![1000, 1000, 500]);
    /// ```
    #[must_use]
    pub fn build(site: &str, delta: &WatchlistDelta) -> Self {
        Self {
            removed: batch_rows(site, &delta.removed),
            added: batch_rows(site, &delta.added),
        }
    }

    /// Number of write statements the plan needs, excluding the final
    /// watch-list update.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.removed.len() + 2 * self.added.len()
    }

    /// Total rows added.
    #[must_use]
    pub fn added_rows(&self) -> usize {
        self.added.iter().map(Vec::len).sum()
    }

    /// Total rows removed.
    #[must_use]
    pub fn removed_rows(&self) -> usize {
        self.removed.iter().map(Vec::len).sum()
    }

    /// Whether the plan changes no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

fn batch_rows(site: &str, entries: &[WatchEntry]) -> Vec<Vec<PageRow>> {
    entries
        .chunks(MAX_ROWS_PER_STATEMENT)
        .map(|chunk| {
            chunk
                .iter()
                .map(|entry| PageRow {
                    id: PageId::derive(site, entry),
                    entry: entry.clone(),
                })
                .collect()
        })
        .collect()
}
