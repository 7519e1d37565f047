//! Resolves site db names to action API endpoints.
//!
//! The matrix is fetched from the meta API with one `action=sitematrix` call
//! the first time any site is resolved and cached for the process lifetime.
//! A failed fetch is not cached; the next lookup retries.

use std::collections::HashMap;

use tokio::sync::OnceCell;
use tracing::info;
use url::Url;

use super::dto::SiteMatrixResponseDto;
use super::source::{map_queue_error, parse_response};
use crate::domain::ports::{OutboundRequest, WatchlistSourceError};
use crate::domain::request_queue::RequestQueue;

/// Lazily loaded map from site db name to action API URL.
pub struct SiteMatrix {
    meta_api: Url,
    queue: RequestQueue,
    endpoints: OnceCell<HashMap<String, Url>>,
}

impl SiteMatrix {
    /// Resolve sites through `meta_api`, sending the lookup through `queue`.
    #[must_use]
    pub fn new(meta_api: Url, queue: RequestQueue) -> Self {
        Self {
            meta_api,
            queue,
            endpoints: OnceCell::new(),
        }
    }

    /// Action API endpoint of `site`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchlistSourceError::UnknownSite`] when the site is not in
    /// the matrix, or the error of the matrix fetch.
    pub async fn api_url(&self, site: &str) -> Result<Url, WatchlistSourceError> {
        let endpoints = self
            .endpoints
            .get_or_try_init(|| self.fetch())
            .await?;
        endpoints
            .get(site)
            .cloned()
            .ok_or_else(|| WatchlistSourceError::unknown_site(site))
    }

    async fn fetch(&self) -> Result<HashMap<String, Url>, WatchlistSourceError> {
        let request = OutboundRequest::new(self.meta_api.clone())
            .with_param("action", "sitematrix")
            .with_param("format", "json")
            .with_param("formatversion", "2");
        let response = self.queue.enqueue(request).await.map_err(map_queue_error)?;
        let dto: SiteMatrixResponseDto = parse_response(response.body)?;
        let endpoints = dto.into_endpoints()?;
        info!(sites = endpoints.len(), "site matrix loaded");
        Ok(endpoints)
    }
}
