//! In-memory port adapters for synchronizer tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::ports::{
    AccessTokenError, AccessTokenProvider, DeltaCommit, DeltaNotifier, DeltaNotifierError,
    NamespaceInfo, WatchlistBatch, WatchlistChange, WatchlistFetch, WatchlistRepository,
    WatchlistRepositoryError, WatchlistSource, WatchlistSourceError,
};
use crate::domain::request_queue::QueuePriority;
use crate::domain::watchlist_sync::MAX_ROWS_PER_STATEMENT;
use crate::domain::{SyncTrigger, WatchEntry, WatchlistRecord};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("test double mutex poisoned"),
    }
}

/// Repository keeping records, mirrors and the shared page table in memory.
#[derive(Default)]
pub struct InMemoryWatchlistRepository {
    records: Mutex<BTreeMap<i64, WatchlistRecord>>,
    mirrors: Mutex<HashMap<i64, HashSet<WatchEntry>>>,
    pages: Mutex<BTreeMap<String, WatchEntry>>,
    commits: Mutex<Vec<DeltaCommit>>,
    fail_apply: AtomicBool,
}

impl InMemoryWatchlistRepository {
    /// Seed one record and its mirrored entries.
    pub fn insert(&self, record: WatchlistRecord, entries: impl IntoIterator<Item = WatchEntry>) {
        lock(&self.mirrors).insert(record.id, entries.into_iter().collect());
        lock(&self.records).insert(record.id, record);
    }

    /// Make every later `apply_delta` fail as a rolled-back transaction.
    pub fn fail_apply(&self) {
        self.fail_apply.store(true, Ordering::SeqCst);
    }

    /// Current mirror of `watchlist_id`.
    #[must_use]
    pub fn mirror(&self, watchlist_id: i64) -> HashSet<WatchEntry> {
        lock(&self.mirrors)
            .get(&watchlist_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Current record of `watchlist_id`.
    #[must_use]
    pub fn record(&self, watchlist_id: i64) -> Option<WatchlistRecord> {
        lock(&self.records).get(&watchlist_id).cloned()
    }

    /// Every commit applied so far.
    #[must_use]
    pub fn commits(&self) -> Vec<DeltaCommit> {
        lock(&self.commits).clone()
    }

    /// Number of distinct page rows.
    #[must_use]
    pub fn page_count(&self) -> usize {
        lock(&self.pages).len()
    }
}

#[async_trait]
impl WatchlistRepository for InMemoryWatchlistRepository {
    async fn list_watchlists(&self) -> Result<Vec<WatchlistRecord>, WatchlistRepositoryError> {
        Ok(lock(&self.records).values().cloned().collect())
    }

    async fn find_watchlist(
        &self,
        watchlist_id: i64,
    ) -> Result<Option<WatchlistRecord>, WatchlistRepositoryError> {
        Ok(self.record(watchlist_id))
    }

    async fn load_mirror(
        &self,
        watchlist_id: i64,
    ) -> Result<HashSet<WatchEntry>, WatchlistRepositoryError> {
        Ok(self.mirror(watchlist_id))
    }

    async fn apply_delta(&self, commit: &DeltaCommit) -> Result<(), WatchlistRepositoryError> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(WatchlistRepositoryError::query("transaction rolled back"));
        }
        let oversized = commit
            .plan
            .removed
            .iter()
            .chain(&commit.plan.added)
            .any(|batch| batch.len() > MAX_ROWS_PER_STATEMENT);
        if oversized {
            return Err(WatchlistRepositoryError::query("batch exceeds statement cap"));
        }

        let mut records = lock(&self.records);
        let Some(record) = records.get_mut(&commit.watchlist_id) else {
            return Err(WatchlistRepositoryError::not_found(commit.watchlist_id));
        };
        let mut mirrors = lock(&self.mirrors);
        let mirror = mirrors.entry(commit.watchlist_id).or_default();
        for row in commit.plan.removed.iter().flatten() {
            mirror.remove(&row.entry);
        }
        let mut pages = lock(&self.pages);
        for row in commit.plan.added.iter().flatten() {
            pages
                .entry(row.id.as_str().to_owned())
                .or_insert_with(|| row.entry.clone());
            mirror.insert(row.entry.clone());
        }

        record.last_synced_at = record.last_synced_at.max(Some(commit.synced_at));
        if commit.trigger == SyncTrigger::Manual {
            record.last_manual_sync_at = record.last_manual_sync_at.max(Some(commit.synced_at));
        }
        record.content_hash = Some(commit.content_hash.clone());
        lock(&self.commits).push(commit.clone());
        Ok(())
    }
}

/// Source replaying scripted pages per site.
///
/// Pages of one site are chained through continuation tokens `"1"`, `"2"`
/// and so on; a page can be replaced by a scripted failure.
pub struct ScriptedWatchlistSource {
    pages: Mutex<HashMap<(String, Option<String>), Result<WatchlistBatch, WatchlistSourceError>>>,
    namespaces: Vec<NamespaceInfo>,
    fetches: Mutex<Vec<WatchlistFetch>>,
}

impl Default for ScriptedWatchlistSource {
    fn default() -> Self {
        let namespaces = [(-1, "Special"), (0, ""), (1, "Talk"), (2, "User"), (3, "User talk")]
            .into_iter()
            .map(|(id, name)| NamespaceInfo {
                id,
                name: name.to_owned(),
                content: id == 0,
            })
            .collect();
        Self {
            pages: Mutex::new(HashMap::new()),
            namespaces,
            fetches: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedWatchlistSource {
    /// Script the pages of `site`.
    #[must_use]
    pub fn with_pages(self, site: &str, pages: Vec<Vec<WatchEntry>>) -> Self {
        {
            let mut scripted = lock(&self.pages);
            let last = pages.len().saturating_sub(1);
            for (index, entries) in pages.into_iter().enumerate() {
                let key = (site.to_owned(), continuation_for(index));
                let continuation = (index < last).then(|| (index + 1).to_string());
                scripted.insert(
                    key,
                    Ok(WatchlistBatch {
                        entries,
                        continuation,
                    }),
                );
            }
        }
        self
    }

    /// Replace page `index` of `site` with `error`.
    #[must_use]
    pub fn failing_page(self, site: &str, index: usize, error: WatchlistSourceError) -> Self {
        lock(&self.pages).insert((site.to_owned(), continuation_for(index)), Err(error));
        self
    }

    /// Every watch-list fetch received, in order.
    #[must_use]
    pub fn fetches(&self) -> Vec<WatchlistFetch> {
        lock(&self.fetches).clone()
    }
}

fn continuation_for(index: usize) -> Option<String> {
    (index > 0).then(|| index.to_string())
}

#[async_trait]
impl WatchlistSource for ScriptedWatchlistSource {
    async fn fetch_watchlist_batch(
        &self,
        request: &WatchlistFetch,
    ) -> Result<WatchlistBatch, WatchlistSourceError> {
        lock(&self.fetches).push(request.clone());
        lock(&self.pages)
            .get(&(request.site.clone(), request.continuation.clone()))
            .cloned()
            .unwrap_or_else(|| Err(WatchlistSourceError::unknown_site(request.site.clone())))
    }

    async fn fetch_namespaces(
        &self,
        _site: &str,
        _priority: QueuePriority,
    ) -> Result<Vec<NamespaceInfo>, WatchlistSourceError> {
        Ok(self.namespaces.clone())
    }
}

/// Token provider deriving a fixed token from the account id.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTokenProvider;

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn bearer_token(&self, account_id: i64) -> Result<String, AccessTokenError> {
        Ok(format!("token-{account_id}"))
    }
}

/// Notifier remembering every change.
#[derive(Default)]
pub struct RecordingNotifier(Mutex<Vec<WatchlistChange>>);

impl RecordingNotifier {
    /// Changes received so far.
    #[must_use]
    pub fn changes(&self) -> Vec<WatchlistChange> {
        lock(&self.0).clone()
    }
}

#[async_trait]
impl DeltaNotifier for RecordingNotifier {
    async fn notify(&self, change: &WatchlistChange) -> Result<(), DeltaNotifierError> {
        lock(&self.0).push(change.clone());
        Ok(())
    }
}
