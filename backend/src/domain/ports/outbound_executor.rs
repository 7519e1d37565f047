//! Driven port for performing one outbound API call.
//!
//! Request queues own ordering and rate budgeting; the executor owns the
//! transport. Keeping one descriptor shape for every call lets the queue stay
//! ignorant of which endpoint it is talking to.

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::define_port_error;

/// One outbound API call: endpoint, query parameters and optional bearer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Endpoint URL without query parameters.
    pub url: Url,
    /// Query parameters in insertion order.
    pub query: Vec<(String, String)>,
    /// OAuth bearer token sent in the `Authorization` header.
    pub bearer_token: Option<String>,
}

impl OutboundRequest {
    /// Start a request against `url`.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            query: Vec::new(),
            bearer_token: None,
        }
    }

    /// Append one query parameter.
    ///
    /// # Examples
    /// ```
    /// use url::Url;
    /// use watchlist_backend::domain::ports::OutboundRequest;
    ///
    /// let url = Url::parse("https://en.wikipedia.org/w/api.php").expect("valid url");
    /// let request = OutboundRequest::new(url)
    ///     .with_param("action", "query")
    ///     .with_param("list", "watchlistraw");
    /// assert_eq!(request.param("list"), Some("watchlistraw"));
    /// ```
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a bearer token.
    #[must_use]
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// First value of query parameter `key`, if present.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Decoded response of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Value,
}

define_port_error! {
    /// Errors surfaced by an outbound executor.
    pub enum OutboundError {
        /// Network transport failed before a response arrived.
        Transport { message: String } =>
            "outbound transport failed: {message}",
        /// The call exceeded the client timeout.
        Timeout { message: String } =>
            "outbound call timed out: {message}",
        /// The remote side throttled the call.
        RateLimited { message: String } =>
            "outbound call rate limited: {message}",
        /// The remote side answered with a non-success status.
        Rejected { status: u16, message: String } =>
            "outbound call rejected with status {status}: {message}",
        /// The body was not valid JSON.
        Decode { message: String } =>
            "outbound response decode failed: {message}",
    }
}

/// Port performing one outbound call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboundExecutor: Send + Sync {
    /// Execute `request` and decode its JSON body.
    async fn execute(&self, request: &OutboundRequest) -> Result<OutboundResponse, OutboundError>;
}
