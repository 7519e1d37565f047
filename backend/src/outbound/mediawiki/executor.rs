//! Reqwest-backed outbound executor.
//!
//! The executor owns transport details only: query serialisation, the bearer
//! header, timeout and HTTP status mapping, and JSON decoding. Ordering and
//! rate budgeting belong to the request queue in front of it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::domain::ports::{OutboundError, OutboundExecutor, OutboundRequest, OutboundResponse};

/// User agent sent with every API call.
pub const DEFAULT_USER_AGENT: &str = "watchlist-backend/0.1";

/// Executor performing GET requests with a shared reqwest client.
#[derive(Clone)]
pub struct ReqwestExecutor {
    client: Client,
}

impl ReqwestExecutor {
    /// Build an executor whose calls time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OutboundExecutor for ReqwestExecutor {
    async fn execute(&self, request: &OutboundRequest) -> Result<OutboundResponse, OutboundError> {
        let mut builder = self
            .client
            .get(request.url.clone())
            .query(&request.query)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = request.bearer_token.as_deref() {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }

        let body = serde_json::from_slice(body.as_ref()).map_err(|error| {
            OutboundError::decode(format!("invalid JSON payload: {error}"))
        })?;
        Ok(OutboundResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn map_transport_error(error: reqwest::Error) -> OutboundError {
    if error.is_timeout() {
        OutboundError::timeout(error.to_string())
    } else {
        OutboundError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> OutboundError {
    let preview = body_preview(body);
    let message = if preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {preview}", status.as_u16())
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => OutboundError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            OutboundError::timeout(message)
        }
        _ => OutboundError::rejected(status.as_u16(), preview),
    }
}

/// Whitespace-collapsed prefix of a response body for error messages.
pub(super) fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::too_many_requests(StatusCode::TOO_MANY_REQUESTS)]
    fn throttling_maps_to_rate_limited(#[case] status: StatusCode) {
        let error = map_status_error(status, b"slow down");
        assert_eq!(error, OutboundError::rate_limited("status 429: slow down"));
    }

    #[rstest]
    #[case::request_timeout(StatusCode::REQUEST_TIMEOUT)]
    #[case::gateway_timeout(StatusCode::GATEWAY_TIMEOUT)]
    fn timeout_statuses_map_to_timeout(#[case] status: StatusCode) {
        assert!(matches!(
            map_status_error(status, b""),
            OutboundError::Timeout { .. }
        ));
    }

    #[rstest]
    #[case::forbidden(StatusCode::FORBIDDEN, 403)]
    #[case::server_error(StatusCode::INTERNAL_SERVER_ERROR, 500)]
    #[case::bad_gateway(StatusCode::BAD_GATEWAY, 502)]
    fn other_statuses_are_rejected_with_their_code(#[case] status: StatusCode, #[case] code: u16) {
        let error = map_status_error(status, b"{\n  \"error\":   \"nope\" }");
        assert_eq!(error, OutboundError::rejected(code, "{ \"error\": \"nope\" }"));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(400);

        let preview = body_preview(body.as_bytes());

        assert_eq!(preview.chars().count(), 163);
        assert!(preview.ends_with("..."));
    }
}
