//! Domain types, orchestration services and port traits.
//!
//! Public surface:
//! - [`WatchEntry`], [`WatchlistRecord`], [`WatchlistDelta`], [`PageId`]:
//!   watch-list values and the set difference between mirror and remote.
//! - [`request_queue`]: rate-limited multi-lane outbound queue.
//! - [`periodic_clock`]: restartable timer driving scheduled syncs.
//! - [`watchlist_sync`]: the synchronizer itself.
//! - [`ports`]: traits implemented by outbound adapters.

mod access_token;
pub mod namespaces;
pub mod periodic_clock;
pub mod ports;
pub mod request_queue;
pub mod runtime;
mod watchlist;
pub mod watchlist_sync;

pub use self::access_token::{AccessToken, REFRESH_MARGIN, TokenService};
pub use self::namespaces::{NamespaceCatalog, SiteNamespaces};
pub use self::watchlist::{
    PageId, SyncTrigger, WatchEntry, WatchlistDelta, WatchlistRecord, content_hash,
    is_subject_namespace,
};
