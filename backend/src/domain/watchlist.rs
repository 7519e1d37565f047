//! Watch-list domain types: entries, records, page identities and deltas.
//!
//! A watch-list is a *set* of [`WatchEntry`] values keyed on
//! `(namespace, title)`. Remote duplicates collapse on insertion and the diff
//! between the local mirror and the remote list is plain set difference.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// One tracked page inside a watch-list.
///
/// Equality, hashing and ordering use `(namespace, title)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WatchEntry {
    /// Remote namespace id.
    pub namespace: i32,
    /// Page title without its namespace prefix.
    pub title: String,
}

impl WatchEntry {
    /// Build an entry.
    ///
    /// # Examples
    /// ```
    /// use watchlist_backend::domain::WatchEntry;
    ///
    /// let entry = WatchEntry::new(0, "Main Page");
    /// assert!(entry.is_subject());
    /// ```
    #[must_use]
    pub fn new(namespace: i32, title: impl Into<String>) -> Self {
        Self {
            namespace,
            title: title.into(),
        }
    }

    /// Whether the entry lives in a subject (content) namespace.
    ///
    /// Subject namespaces are even and non-negative; their talk companions
    /// are odd, and negative ids are virtual namespaces.
    #[must_use]
    pub fn is_subject(&self) -> bool {
        is_subject_namespace(self.namespace)
    }
}

/// Whether `namespace` is a subject namespace.
#[must_use]
pub fn is_subject_namespace(namespace: i32) -> bool {
    namespace >= 0 && namespace.rem_euclid(2) == 0
}

/// Content-derived page identifier shared by every watch-list on a site.
///
/// The id is the hex SHA-256 of `site:namespace:title`, so the same page
/// always maps to the same row regardless of who watches it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(String);

impl PageId {
    /// Derive the id of `entry` on `site`.
    ///
    /// # Examples
    /// ```
    /// use watchlist_backend::domain::{PageId, WatchEntry};
    ///
    /// let a = PageId::derive("enwiki", &WatchEntry::new(0, "Earth"));
    /// let b = PageId::derive("enwiki", &WatchEntry::new(0, "Earth"));
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 64);
    /// ```
    #[must_use]
    pub fn derive(site: &str, entry: &WatchEntry) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(site.as_bytes());
        hasher.update(b":");
        hasher.update(entry.namespace.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(entry.title.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an id loaded from storage.
    #[must_use]
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's subscription to one remote site's watch-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchlistRecord {
    /// Internal record id.
    pub id: i64,
    /// Owning account id.
    pub account_id: i64,
    /// Site database name, e.g. `enwiki`.
    pub site: String,
    /// Minimum time between two scheduled syncs.
    pub interval: Duration,
    /// Last successful sync, scheduled or manual.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Last successful user-requested sync.
    pub last_manual_sync_at: Option<DateTime<Utc>>,
    /// SHA-256 of the last mirrored entry list.
    pub content_hash: Option<Vec<u8>>,
}

impl WatchlistRecord {
    /// Whether the record should be synced at `now`.
    ///
    /// A record that was never synced is always due.
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use chrono::{TimeZone, Utc};
    /// use watchlist_backend::domain::WatchlistRecord;
    ///
    /// let synced = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid");
    /// let record = WatchlistRecord {
    ///     id: 1,
    ///     account_id: 9,
    ///     site: "enwiki".to_owned(),
    ///     interval: Duration::from_secs(600),
    ///     last_synced_at: Some(synced),
    ///     last_manual_sync_at: None,
    ///     content_hash: None,
    /// };
    /// assert!(!record.is_due(synced + chrono::TimeDelta::seconds(599)));
    /// assert!(record.is_due(synced + chrono::TimeDelta::seconds(600)));
    /// ```
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_synced_at else {
            return true;
        };
        let interval = TimeDelta::from_std(self.interval).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(last) >= interval
    }
}

/// What started a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Periodic clock tick.
    Scheduled,
    /// Explicit user request.
    Manual,
}

/// Set difference between a local mirror and the remote list.
///
/// Both sides are sorted so batches and logs are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchlistDelta {
    /// Entries present remotely but not locally.
    pub added: Vec<WatchEntry>,
    /// Entries present locally but no longer remotely.
    pub removed: Vec<WatchEntry>,
}

impl WatchlistDelta {
    /// Compute `added = remote - local` and `removed = local - remote`.
    ///
    /// # Examples
    /// ```
    /// use std::collections::HashSet;
    /// use watchlist_backend::domain::{WatchEntry, WatchlistDelta};
    ///
    /// let local: HashSet<_> = [WatchEntry::new(0, "A"), WatchEntry::new(0, "B")].into();
    /// let remote: HashSet<_> = [WatchEntry::new(0, "B"), WatchEntry::new(0, "C")].into();
    /// let delta = WatchlistDelta::between(&local, &remote);
    /// assert_eq!(delta.removed, vec![WatchEntry::new(0, "A")]);
    /// assert_eq!(delta.added, vec![WatchEntry::new(0, "C")]);
    /// ```
    #[must_use]
    pub fn between(local: &HashSet<WatchEntry>, remote: &HashSet<WatchEntry>) -> Self {
        let mut added: Vec<_> = remote.difference(local).cloned().collect();
        let mut removed: Vec<_> = local.difference(remote).cloned().collect();
        added.sort();
        removed.sort();
        Self { added, removed }
    }

    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// SHA-256 over the sorted JSON rendering of `entries`.
#[must_use]
pub fn content_hash(entries: &HashSet<WatchEntry>) -> Vec<u8> {
    let mut sorted: Vec<&WatchEntry> = entries.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    // Serialising plain structs of ints and strings cannot fail.
    if let Ok(encoded) = serde_json::to_vec(&sorted) {
        hasher.update(encoded);
    }
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    //! Coverage for entry classification, ids and diffing.

    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn set(entries: &[(i32, &str)]) -> HashSet<WatchEntry> {
        entries
            .iter()
            .map(|(ns, title)| WatchEntry::new(*ns, *title))
            .collect()
    }

    #[rstest]
    #[case::main(0, true)]
    #[case::talk(1, false)]
    #[case::user(2, true)]
    #[case::user_talk(3, false)]
    #[case::special(-1, false)]
    #[case::media(-2, false)]
    fn classifies_subject_namespaces(#[case] namespace: i32, #[case] expected: bool) {
        assert_eq!(WatchEntry::new(namespace, "X").is_subject(), expected);
    }

    #[test]
    fn page_ids_differ_across_sites_and_namespaces() {
        let entry = WatchEntry::new(0, "Earth");
        let talk = WatchEntry::new(1, "Earth");

        assert_ne!(PageId::derive("enwiki", &entry), PageId::derive("dewiki", &entry));
        assert_ne!(PageId::derive("enwiki", &entry), PageId::derive("enwiki", &talk));
    }

    #[test]
    fn diff_matches_reference_example() {
        let local = set(&[(0, "A"), (0, "B")]);
        let remote = set(&[(0, "B"), (0, "C")]);

        let delta = WatchlistDelta::between(&local, &remote);

        assert_eq!(delta.removed, vec![WatchEntry::new(0, "A")]);
        assert_eq!(delta.added, vec![WatchEntry::new(0, "C")]);
    }

    #[test]
    fn diff_of_identical_sets_is_empty() {
        let both = set(&[(0, "A"), (2, "User:B")]);
        assert!(WatchlistDelta::between(&both, &both).is_empty());
    }

    #[test]
    fn namespace_is_part_of_the_key() {
        let local = set(&[(0, "A")]);
        let remote = set(&[(2, "A")]);

        let delta = WatchlistDelta::between(&local, &remote);

        assert_eq!(delta.added, vec![WatchEntry::new(2, "A")]);
        assert_eq!(delta.removed, vec![WatchEntry::new(0, "A")]);
    }

    #[test]
    fn content_hash_ignores_insertion_order() {
        let forward = set(&[(0, "A"), (0, "B"), (4, "C")]);
        let backward = set(&[(4, "C"), (0, "B"), (0, "A")]);

        assert_eq!(content_hash(&forward), content_hash(&backward));
        assert_ne!(content_hash(&forward), content_hash(&set(&[(0, "A")])));
    }

    #[test]
    fn never_synced_record_is_due() {
        let record = WatchlistRecord {
            id: 1,
            account_id: 1,
            site: "enwiki".to_owned(),
            interval: Duration::from_secs(3600),
            last_synced_at: None,
            last_manual_sync_at: None,
            content_hash: None,
        };
        let now = Utc
            .with_ymd_and_hms(2026, 3, 1, 0, 0, 0)
            .single()
            .expect("valid time");

        assert!(record.is_due(now));
    }
}
