//! Per-account OAuth tokens and the service that keeps them fresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tracing::{debug, info};

use crate::domain::ports::{
    AccessTokenError, AccessTokenProvider, AccountTokenStore, TokenRefresher,
};

/// How close to expiry a token is refreshed before use.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// An OAuth access/refresh token pair.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Bearer token sent to the API.
    pub access_token: String,
    /// Token used to mint a new access token.
    pub refresh_token: String,
    /// Expiry of `access_token`.
    pub expires_at: DateTime<Utc>,
    /// When the pair was issued.
    pub issued_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl AccessToken {
    /// Build a token from an OAuth grant response received at `now`.
    #[must_use]
    pub fn from_grant(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let lifetime = TimeDelta::from_std(expires_in).unwrap_or(TimeDelta::MAX);
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
            issued_at: now,
        }
    }

    /// Whether the token expires within [`REFRESH_MARGIN`] of `now`.
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use chrono::{TimeDelta, TimeZone, Utc};
    /// use watchlist_backend::domain::AccessToken;
    ///
    /// let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid");
    /// let token = AccessToken::from_grant("a", "r", Duration::from_secs(3600), now);
    /// assert!(!token.needs_refresh(now));
    /// assert!(token.needs_refresh(now + TimeDelta::seconds(3540)));
    /// ```
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        let margin = TimeDelta::from_std(REFRESH_MARGIN).unwrap_or(TimeDelta::zero());
        self.expires_at.signed_duration_since(now) <= margin
    }
}

/// [`AccessTokenProvider`] backed by a token store and a refresher.
///
/// Refreshes are serialised so concurrent syncs of one account do not spend
/// the same refresh token twice.
pub struct TokenService {
    store: Arc<dyn AccountTokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    clock: Arc<dyn Clock>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl TokenService {
    /// Build the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn AccountTokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            refresher,
            clock,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self, account_id: i64) -> Result<AccessToken, AccessTokenError> {
        self.store
            .load(account_id)
            .await
            .map_err(|error| AccessTokenError::store(error.to_string()))
    }
}

#[async_trait]
impl AccessTokenProvider for TokenService {
    async fn bearer_token(&self, account_id: i64) -> Result<String, AccessTokenError> {
        let token = self.load(account_id).await?;
        if !token.needs_refresh(self.clock.utc()) {
            return Ok(token.access_token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another task may have refreshed while this one waited.
        let token = self.load(account_id).await?;
        if !token.needs_refresh(self.clock.utc()) {
            debug!(account_id, "access token refreshed concurrently");
            return Ok(token.access_token);
        }

        let fresh = self
            .refresher
            .refresh(&token.refresh_token)
            .await
            .map_err(|error| AccessTokenError::refresh(error.to_string()))?;
        self.store
            .save(account_id, &fresh)
            .await
            .map_err(|error| AccessTokenError::store(error.to_string()))?;
        info!(account_id, expires_at = %fresh.expires_at, "access token refreshed");
        Ok(fresh.access_token)
    }
}
