//! `WatchlistSource` adapter over the MediaWiki action API.
//!
//! Every call is submitted to the request queue matching the fetch priority,
//! so scheduled syncs and user requests share one rate budget without
//! user requests waiting behind a long scheduled backlog.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::dto::{SiteInfoResponseDto, WatchlistRawResponseDto};
use super::site_matrix::SiteMatrix;
use crate::domain::ports::{
    NamespaceInfo, OutboundError, OutboundRequest, WatchlistBatch, WatchlistFetch,
    WatchlistSource, WatchlistSourceError,
};
use crate::domain::request_queue::{OutboundQueues, QueueError, QueuePriority};

/// Reads watch-lists and namespace tables through the request queues.
pub struct MediaWikiWatchlistSource {
    queues: OutboundQueues,
    sites: Arc<SiteMatrix>,
}

impl MediaWikiWatchlistSource {
    /// Build a source resolving sites through `sites`.
    #[must_use]
    pub fn new(queues: OutboundQueues, sites: Arc<SiteMatrix>) -> Self {
        Self { queues, sites }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        priority: QueuePriority,
        request: OutboundRequest,
    ) -> Result<T, WatchlistSourceError> {
        let response = self
            .queues
            .for_priority(priority)
            .enqueue(request)
            .await
            .map_err(map_queue_error)?;
        parse_response(response.body)
    }
}

pub(super) fn map_queue_error(error: QueueError) -> WatchlistSourceError {
    match error {
        QueueError::Outbound(OutboundError::Decode { message }) => {
            WatchlistSourceError::decode(message)
        }
        other => WatchlistSourceError::transport(other.to_string()),
    }
}

pub(super) fn parse_response<T: DeserializeOwned>(body: Value) -> Result<T, WatchlistSourceError> {
    serde_json::from_value(body).map_err(|error| {
        WatchlistSourceError::decode(format!("unexpected API payload: {error}"))
    })
}

fn join_namespaces(namespaces: &[i32]) -> String {
    namespaces
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

#[async_trait]
impl WatchlistSource for MediaWikiWatchlistSource {
    async fn fetch_watchlist_batch(
        &self,
        fetch: &WatchlistFetch,
    ) -> Result<WatchlistBatch, WatchlistSourceError> {
        let endpoint = self.sites.api_url(&fetch.site).await?;
        let mut request = OutboundRequest::new(endpoint)
            .with_param("action", "query")
            .with_param("list", "watchlistraw")
            .with_param("wrlimit", "max")
            .with_param("format", "json")
            .with_param("formatversion", "2")
            .with_bearer(fetch.bearer_token.as_str());
        if !fetch.namespaces.is_empty() {
            request = request.with_param("wrnamespace", join_namespaces(&fetch.namespaces));
        }
        if let Some(token) = fetch.continuation.as_deref() {
            request = request.with_param("wrcontinue", token);
        }

        let dto: WatchlistRawResponseDto = self.call(fetch.priority, request).await?;
        dto.into_batch()
    }

    async fn fetch_namespaces(
        &self,
        site: &str,
        priority: QueuePriority,
    ) -> Result<Vec<NamespaceInfo>, WatchlistSourceError> {
        let endpoint = self.sites.api_url(site).await?;
        let request = OutboundRequest::new(endpoint)
            .with_param("action", "query")
            .with_param("meta", "siteinfo")
            .with_param("siprop", "namespaces")
            .with_param("format", "json")
            .with_param("formatversion", "2");

        let dto: SiteInfoResponseDto = self.call(priority, request).await?;
        dto.into_namespaces()
    }
}
