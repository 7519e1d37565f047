//! MediaWiki outbound adapters.
//!
//! This module provides the reqwest executor behind the request queues, the
//! `WatchlistSource` implementation over the action API, site endpoint
//! resolution and the OAuth token refresher.

mod dto;
mod executor;
mod oauth;
mod site_matrix;
mod source;

pub use executor::{DEFAULT_USER_AGENT, ReqwestExecutor};
pub use oauth::{OAuthClient, OAuthTokenRefresher};
pub use site_matrix::SiteMatrix;
pub use source::MediaWikiWatchlistSource;
