//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod account_tokens;
mod delta_notifier;
mod outbound_executor;
mod watchlist_repository;
mod watchlist_source;

#[cfg(test)]
pub use account_tokens::{MockAccessTokenProvider, MockAccountTokenStore, MockTokenRefresher};
pub use account_tokens::{
    AccessTokenError, AccessTokenProvider, AccountTokenStore, AccountTokenStoreError,
    TokenRefreshError, TokenRefresher,
};
#[cfg(test)]
pub use delta_notifier::MockDeltaNotifier;
pub use delta_notifier::{DeltaNotifier, DeltaNotifierError, NoOpDeltaNotifier, WatchlistChange};
#[cfg(test)]
pub use outbound_executor::MockOutboundExecutor;
pub use outbound_executor::{OutboundError, OutboundExecutor, OutboundRequest, OutboundResponse};
#[cfg(test)]
pub use watchlist_repository::MockWatchlistRepository;
pub use watchlist_repository::{DeltaCommit, WatchlistRepository, WatchlistRepositoryError};
#[cfg(test)]
pub use watchlist_source::MockWatchlistSource;
pub use watchlist_source::{
    NamespaceInfo, WatchlistBatch, WatchlistFetch, WatchlistSource, WatchlistSourceError,
};
