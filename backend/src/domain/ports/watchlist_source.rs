//! Driven port for reading remote watch-lists and site namespace metadata.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::WatchEntry;
use crate::domain::request_queue::QueuePriority;

/// One page request against a remote watch-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchlistFetch {
    /// Site database name, e.g. `enwiki`.
    pub site: String,
    /// Bearer token of the watch-list owner.
    pub bearer_token: String,
    /// Namespaces to include; empty means every namespace.
    pub namespaces: Vec<i32>,
    /// Continuation token from the previous page.
    pub continuation: Option<String>,
    /// Queue to submit the call to.
    pub priority: QueuePriority,
}

/// One page of a remote watch-list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatchlistBatch {
    /// Entries on this page.
    pub entries: Vec<WatchEntry>,
    /// Token for the next page; `None` on the last page.
    pub continuation: Option<String>,
}

/// Metadata about one remote namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    /// Namespace id.
    pub id: i32,
    /// Localised namespace name; empty for the main namespace.
    pub name: String,
    /// Whether the site counts the namespace as content.
    pub content: bool,
}

define_port_error! {
    /// Errors surfaced while reading remote watch-list data.
    pub enum WatchlistSourceError {
        /// The call could not be completed.
        Transport { message: String } =>
            "watch-list source transport failed: {message}",
        /// The site is not listed in the site matrix.
        UnknownSite { site: String } =>
            "unknown site: {site}",
        /// The API answered with an error payload.
        Rejected { code: String, message: String } =>
            "watch-list source rejected request ({code}): {message}",
        /// The payload did not match the expected shape.
        Decode { message: String } =>
            "watch-list source payload invalid: {message}",
    }
}

/// Port for paginated watch-list reads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatchlistSource: Send + Sync {
    /// Fetch one page of a remote watch-list.
    async fn fetch_watchlist_batch(
        &self,
        request: &WatchlistFetch,
    ) -> Result<WatchlistBatch, WatchlistSourceError>;

    /// Fetch the namespace table of `site`.
    async fn fetch_namespaces(
        &self,
        site: &str,
        priority: QueuePriority,
    ) -> Result<Vec<NamespaceInfo>, WatchlistSourceError>;
}
