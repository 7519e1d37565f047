//! Driven ports around per-account OAuth tokens.
//!
//! [`AccessTokenProvider`] is what the synchronizer consumes. The store and
//! refresher ports back the domain `TokenService`, which implements the
//! provider by loading, refreshing when close to expiry, and saving.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::AccessToken;

define_port_error! {
    /// Errors surfaced while obtaining a bearer token.
    pub enum AccessTokenError {
        /// The stored token could not be read or written.
        Store { message: String } =>
            "access token store failed: {message}",
        /// The token endpoint refused or failed the refresh.
        Refresh { message: String } =>
            "access token refresh failed: {message}",
    }
}

/// Port supplying a usable bearer token for an account.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Return a bearer token for `account_id` that is not about to expire.
    async fn bearer_token(&self, account_id: i64) -> Result<String, AccessTokenError>;
}

define_port_error! {
    /// Errors surfaced by account token persistence.
    pub enum AccountTokenStoreError {
        /// No storage connection could be obtained.
        Connection { message: String } =>
            "account token store connection failed: {message}",
        /// A statement failed.
        Query { message: String } =>
            "account token store query failed: {message}",
        /// No account row exists.
        MissingAccount { account_id: i64 } =>
            "account {account_id} not found",
    }
}

/// Port persisting OAuth tokens per account.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountTokenStore: Send + Sync {
    /// Load the current token of `account_id`.
    async fn load(&self, account_id: i64) -> Result<AccessToken, AccountTokenStoreError>;

    /// Replace the token of `account_id`.
    async fn save(&self, account_id: i64, token: &AccessToken)
    -> Result<(), AccountTokenStoreError>;
}

define_port_error! {
    /// Errors surfaced by the OAuth token endpoint.
    pub enum TokenRefreshError {
        /// The call could not be completed.
        Transport { message: String } =>
            "token endpoint transport failed: {message}",
        /// The endpoint rejected the refresh token.
        Rejected { message: String } =>
            "token endpoint rejected refresh: {message}",
        /// The grant payload was malformed.
        Decode { message: String } =>
            "token endpoint payload invalid: {message}",
    }
}

/// Port exchanging a refresh token for a new access token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Run the `refresh_token` grant.
    async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, TokenRefreshError>;
}
