//! OAuth 2 `refresh_token` grant against the MediaWiki REST endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use reqwest::{Client, Url};
use serde::Deserialize;

use super::executor::{DEFAULT_USER_AGENT, body_preview};
use crate::domain::AccessToken;
use crate::domain::ports::{TokenRefreshError, TokenRefresher};

/// OAuth client credentials registered with the remote site.
#[derive(Clone)]
pub struct OAuthClient {
    /// Consumer key.
    pub client_id: String,
    /// Consumer secret.
    pub client_secret: String,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// `TokenRefresher` posting the refresh grant with reqwest.
pub struct OAuthTokenRefresher {
    http: Client,
    token_url: Url,
    client: OAuthClient,
    clock: Arc<dyn Clock>,
}

impl OAuthTokenRefresher {
    /// Build a refresher posting to `token_url`.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(
        token_url: Url,
        client: OAuthClient,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            token_url,
            client,
            clock,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GrantDto {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

fn parse_grant(body: &[u8], now: DateTime<Utc>) -> Result<AccessToken, TokenRefreshError> {
    let grant: GrantDto = serde_json::from_slice(body)
        .map_err(|error| TokenRefreshError::decode(format!("invalid grant payload: {error}")))?;
    Ok(AccessToken::from_grant(
        grant.access_token,
        grant.refresh_token,
        Duration::from_secs(grant.expires_in),
        now,
    ))
}

#[async_trait]
impl TokenRefresher for OAuthTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, TokenRefreshError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|error| TokenRefreshError::transport(error.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|error| TokenRefreshError::transport(error.to_string()))?;
        if !status.is_success() {
            return Err(TokenRefreshError::rejected(format!(
                "status {}: {}",
                status.as_u16(),
                body_preview(body.as_ref())
            )));
        }
        parse_grant(body.as_ref(), self.clock.utc())
    }
}
