//! Process configuration loaded via OrthoConfig.
//!
//! Every value can come from the command line or from a `WMWW_` prefixed
//! environment variable. Tunables fall back to built-in defaults; the
//! database URL and the OAuth client credentials are required and reported
//! together by [`SyncSettings::validate`].

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use url::Url;

use crate::domain::request_queue::{DEFAULT_BACKLOG_WARNING, DEFAULT_LANES, QueueConfig};
use crate::outbound::persistence::PoolConfig;

const DEFAULT_POOL_SIZE: usize = 3;
const DEFAULT_POOL_IDLE_TIMEOUT_MS: u64 = 2000;
const DEFAULT_POOL_SWEEP_INTERVAL_MS: u64 = 20;
const DEFAULT_POOL_ACQUIRE_TIMEOUT_SECS: u64 = 360;
const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 1000;
const DEFAULT_RATE_LIMIT_MAX_CALLS: u32 = 200;
const DEFAULT_SYNC_TICK_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_META_API_URL: &str = "https://meta.wikimedia.org/w/api.php";
const DEFAULT_OAUTH_TOKEN_URL: &str = "https://meta.wikimedia.org/w/rest.php/oauth2/access_token";

/// Configuration problems found by [`SyncSettings::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// One or more values are missing or out of range.
    #[error("invalid configuration: {}", .problems.join("; "))]
    Invalid {
        /// Human-readable descriptions of each problem found.
        problems: Vec<String>,
    },
}

/// Settings for the watch-list sync process.
#[derive(Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "WMWW")]
pub struct SyncSettings {
    /// PostgreSQL connection URL.
    pub database_url: Option<String>,
    /// Number of pooled storage connections.
    pub pool_size: Option<usize>,
    /// Idle time after which a pooled connection closes.
    pub pool_idle_timeout_ms: Option<u64>,
    /// Period of the idle-connection sweep.
    pub pool_sweep_interval_ms: Option<u64>,
    /// Longest wait for a pooled connection.
    pub pool_acquire_timeout_secs: Option<u64>,
    /// Length of one rate-limit window.
    pub rate_limit_window_ms: Option<u64>,
    /// Outbound calls allowed per window across all queues.
    pub rate_limit_max_calls: Option<u32>,
    /// Lanes per request queue.
    pub queue_lanes: Option<usize>,
    /// Period of the scheduled sync.
    pub sync_tick_secs: Option<u64>,
    /// Timeout of one outbound HTTP call.
    pub http_timeout_secs: Option<u64>,
    /// Meta API used for the site matrix.
    pub meta_api_url: Option<String>,
    /// OAuth 2 token endpoint.
    pub oauth_token_url: Option<String>,
    /// OAuth consumer key.
    pub oauth_client_id: Option<String>,
    /// OAuth consumer secret.
    pub oauth_client_secret: Option<String>,
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSettings")
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("pool_size", &self.pool_size)
            .field("pool_idle_timeout_ms", &self.pool_idle_timeout_ms)
            .field("pool_sweep_interval_ms", &self.pool_sweep_interval_ms)
            .field("pool_acquire_timeout_secs", &self.pool_acquire_timeout_secs)
            .field("rate_limit_window_ms", &self.rate_limit_window_ms)
            .field("rate_limit_max_calls", &self.rate_limit_max_calls)
            .field("queue_lanes", &self.queue_lanes)
            .field("sync_tick_secs", &self.sync_tick_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("meta_api_url", &self.meta_api_url)
            .field("oauth_token_url", &self.oauth_token_url)
            .field("oauth_client_id", &self.oauth_client_id)
            .field(
                "oauth_client_secret",
                &self.oauth_client_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Required values extracted by a successful [`SyncSettings::validate`].
#[derive(Clone)]
pub struct RequiredSettings {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Meta API endpoint.
    pub meta_api_url: Url,
    /// OAuth 2 token endpoint.
    pub oauth_token_url: Url,
    /// OAuth consumer key.
    pub oauth_client_id: String,
    /// OAuth consumer secret.
    pub oauth_client_secret: String,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|raw| raw.trim()).filter(|raw| !raw.is_empty())
}

impl SyncSettings {
    /// Check every value and report all problems at once.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] listing each missing required
    /// value, zero tunable and unparsable URL.
    pub fn validate(&self) -> Result<RequiredSettings, SettingsError> {
        let mut problems = Vec::new();

        let database_url = present(self.database_url.as_ref());
        let client_id = present(self.oauth_client_id.as_ref());
        let client_secret = present(self.oauth_client_secret.as_ref());
        for (name, value) in [
            ("WMWW_DATABASE_URL", database_url),
            ("WMWW_OAUTH_CLIENT_ID", client_id),
            ("WMWW_OAUTH_CLIENT_SECRET", client_secret),
        ] {
            if value.is_none() {
                problems.push(format!("{name} is required"));
            }
        }

        let zero_checks = [
            ("WMWW_POOL_SIZE", self.pool_size.map(as_u64)),
            ("WMWW_POOL_IDLE_TIMEOUT_MS", self.pool_idle_timeout_ms),
            ("WMWW_POOL_SWEEP_INTERVAL_MS", self.pool_sweep_interval_ms),
            ("WMWW_POOL_ACQUIRE_TIMEOUT_SECS", self.pool_acquire_timeout_secs),
            ("WMWW_RATE_LIMIT_WINDOW_MS", self.rate_limit_window_ms),
            ("WMWW_RATE_LIMIT_MAX_CALLS", self.rate_limit_max_calls.map(u64::from)),
            ("WMWW_QUEUE_LANES", self.queue_lanes.map(as_u64)),
            ("WMWW_SYNC_TICK_SECS", self.sync_tick_secs),
            ("WMWW_HTTP_TIMEOUT_SECS", self.http_timeout_secs),
        ];
        for (name, value) in zero_checks {
            if value == Some(0) {
                problems.push(format!("{name} must be greater than zero"));
            }
        }

        let meta_api_url = parse_url(
            "WMWW_META_API_URL",
            self.meta_api_url.as_deref().unwrap_or(DEFAULT_META_API_URL),
            &mut problems,
        );
        let oauth_token_url = parse_url(
            "WMWW_OAUTH_TOKEN_URL",
            self.oauth_token_url
                .as_deref()
                .unwrap_or(DEFAULT_OAUTH_TOKEN_URL),
            &mut problems,
        );

        match (
            database_url,
            client_id,
            client_secret,
            meta_api_url,
            oauth_token_url,
        ) {
            (Some(database_url), Some(client_id), Some(client_secret), Some(meta), Some(token))
                if problems.is_empty() =>
            {
                Ok(RequiredSettings {
                    database_url: database_url.to_owned(),
                    meta_api_url: meta,
                    oauth_token_url: token,
                    oauth_client_id: client_id.to_owned(),
                    oauth_client_secret: client_secret.to_owned(),
                })
            }
            _ => Err(SettingsError::Invalid { problems }),
        }
    }

    /// Pool configuration with defaults applied.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_size(self.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
            .with_idle_timeout(Duration::from_millis(
                self.pool_idle_timeout_ms
                    .unwrap_or(DEFAULT_POOL_IDLE_TIMEOUT_MS),
            ))
            .with_sweep_interval(Duration::from_millis(
                self.pool_sweep_interval_ms
                    .unwrap_or(DEFAULT_POOL_SWEEP_INTERVAL_MS),
            ))
            .with_acquire_timeout(Duration::from_secs(
                self.pool_acquire_timeout_secs
                    .unwrap_or(DEFAULT_POOL_ACQUIRE_TIMEOUT_SECS),
            ))
    }

    /// Queue configuration with defaults applied.
    #[must_use]
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            lanes: self.queue_lanes.unwrap_or(DEFAULT_LANES).max(1),
            backlog_warning: DEFAULT_BACKLOG_WARNING,
        }
    }

    /// Rate-limit window and call cap.
    #[must_use]
    pub fn rate_limit(&self) -> (Duration, u32) {
        (
            Duration::from_millis(
                self.rate_limit_window_ms
                    .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_MS),
            ),
            self.rate_limit_max_calls
                .unwrap_or(DEFAULT_RATE_LIMIT_MAX_CALLS),
        )
    }

    /// Period of the scheduled sync.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.sync_tick_secs.unwrap_or(DEFAULT_SYNC_TICK_SECS))
    }

    /// Timeout of one outbound HTTP call.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS))
    }
}

fn as_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn parse_url(name: &str, raw: &str, problems: &mut Vec<String>) -> Option<Url> {
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(error) => {
            problems.push(format!("{name} is not a valid URL: {error}"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for settings loading and validation.

    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    use super::*;

    const VARS: [&str; 14] = [
        "WMWW_DATABASE_URL",
        "WMWW_POOL_SIZE",
        "WMWW_POOL_IDLE_TIMEOUT_MS",
        "WMWW_POOL_SWEEP_INTERVAL_MS",
        "WMWW_POOL_ACQUIRE_TIMEOUT_SECS",
        "WMWW_RATE_LIMIT_WINDOW_MS",
        "WMWW_RATE_LIMIT_MAX_CALLS",
        "WMWW_QUEUE_LANES",
        "WMWW_SYNC_TICK_SECS",
        "WMWW_HTTP_TIMEOUT_SECS",
        "WMWW_META_API_URL",
        "WMWW_OAUTH_TOKEN_URL",
        "WMWW_OAUTH_CLIENT_ID",
        "WMWW_OAUTH_CLIENT_SECRET",
    ];

    fn env_with(overrides: &[(&str, &str)]) -> Vec<(&'static str, Option<String>)> {
        VARS.iter()
            .map(|name| {
                let value = overrides
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| (*value).to_owned());
                (*name, value)
            })
            .collect()
    }

    fn load() -> SyncSettings {
        SyncSettings::load_from_iter([OsString::from("watchlist-backend")])
            .expect("config should load")
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("WMWW_DATABASE_URL", "postgres://localhost/watchlists"),
        ("WMWW_OAUTH_CLIENT_ID", "consumer"),
        ("WMWW_OAUTH_CLIENT_SECRET", "secret"),
    ];

    #[rstest]
    fn defaults_apply_when_only_required_values_are_set() {
        let _guard = lock_env(env_with(&REQUIRED));

        let settings = load();
        let required = settings.validate().expect("valid settings");

        assert_eq!(required.database_url, "postgres://localhost/watchlists");
        assert_eq!(required.meta_api_url.as_str(), DEFAULT_META_API_URL);
        assert_eq!(settings.pool_config(), PoolConfig::default());
        assert_eq!(settings.queue_config(), QueueConfig::default());
        assert_eq!(settings.rate_limit(), (Duration::from_millis(1000), 200));
        assert_eq!(settings.tick_interval(), Duration::from_secs(60));
        assert_eq!(settings.http_timeout(), Duration::from_secs(30));
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let mut overrides = REQUIRED.to_vec();
        overrides.extend([
            ("WMWW_POOL_SIZE", "5"),
            ("WMWW_QUEUE_LANES", "2"),
            ("WMWW_RATE_LIMIT_MAX_CALLS", "50"),
            ("WMWW_SYNC_TICK_SECS", "300"),
        ]);
        let _guard = lock_env(env_with(&overrides));

        let settings = load();

        assert!(settings.validate().is_ok());
        assert_eq!(settings.pool_config().size(), 5);
        assert_eq!(settings.queue_config().lanes, 2);
        assert_eq!(settings.rate_limit().1, 50);
        assert_eq!(settings.tick_interval(), Duration::from_secs(300));
    }

    #[rstest]
    fn every_problem_is_reported_at_once() {
        let _guard = lock_env(env_with(&[
            ("WMWW_POOL_SIZE", "0"),
            ("WMWW_META_API_URL", "not a url"),
        ]));

        let error = load().validate().err().expect("invalid settings");

        let SettingsError::Invalid { problems } = error;
        assert_eq!(
            problems,
            vec![
                "WMWW_DATABASE_URL is required".to_owned(),
                "WMWW_OAUTH_CLIENT_ID is required".to_owned(),
                "WMWW_OAUTH_CLIENT_SECRET is required".to_owned(),
                "WMWW_POOL_SIZE must be greater than zero".to_owned(),
                "WMWW_META_API_URL is not a valid URL: relative URL without a base".to_owned(),
            ]
        );
    }

    #[rstest]
    fn debug_output_redacts_secrets() {
        let _guard = lock_env(env_with(&REQUIRED));

        let rendered = format!("{:?}", load());

        assert!(!rendered.contains("postgres://"));
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("consumer"));
    }
}
