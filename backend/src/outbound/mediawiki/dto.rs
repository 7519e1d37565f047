//! DTOs for decoding MediaWiki action API responses.
//!
//! Requests ask for `formatversion=2`, so booleans are real booleans and
//! namespace tables are objects keyed by namespace id.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::domain::WatchEntry;
use crate::domain::ports::{NamespaceInfo, WatchlistBatch, WatchlistSourceError};

/// `{"error": {"code": ..., "info": ...}}` payload returned with HTTP 200.
#[derive(Debug, Deserialize)]
pub(super) struct ApiErrorDto {
    pub(super) code: String,
    #[serde(default)]
    pub(super) info: String,
}

impl ApiErrorDto {
    fn into_source_error(self) -> WatchlistSourceError {
        WatchlistSourceError::rejected(self.code, self.info)
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct WatchlistRawResponseDto {
    #[serde(default)]
    watchlistraw: Vec<WatchlistRawItemDto>,
    #[serde(rename = "continue")]
    continuation: Option<WatchlistRawContinueDto>,
    error: Option<ApiErrorDto>,
}

#[derive(Debug, Deserialize)]
struct WatchlistRawItemDto {
    ns: i32,
    title: String,
}

#[derive(Debug, Deserialize)]
struct WatchlistRawContinueDto {
    wrcontinue: String,
}

impl WatchlistRawResponseDto {
    pub(super) fn into_batch(self) -> Result<WatchlistBatch, WatchlistSourceError> {
        if let Some(error) = self.error {
            return Err(error.into_source_error());
        }
        Ok(WatchlistBatch {
            entries: self
                .watchlistraw
                .into_iter()
                .map(|item| WatchEntry::new(item.ns, item.title))
                .collect(),
            continuation: self.continuation.map(|next| next.wrcontinue),
        })
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct SiteInfoResponseDto {
    query: Option<SiteInfoQueryDto>,
    error: Option<ApiErrorDto>,
}

#[derive(Debug, Deserialize)]
struct SiteInfoQueryDto {
    namespaces: BTreeMap<String, NamespaceDto>,
}

#[derive(Debug, Deserialize)]
struct NamespaceDto {
    id: i32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    content: bool,
}

impl SiteInfoResponseDto {
    pub(super) fn into_namespaces(self) -> Result<Vec<NamespaceInfo>, WatchlistSourceError> {
        if let Some(error) = self.error {
            return Err(error.into_source_error());
        }
        let query = self
            .query
            .ok_or_else(|| WatchlistSourceError::decode("siteinfo response lacks `query`"))?;
        Ok(query
            .namespaces
            .into_values()
            .map(|namespace| NamespaceInfo {
                id: namespace.id,
                name: namespace.name,
                content: namespace.content,
            })
            .collect())
    }
}

/// `action=sitematrix` payload.
///
/// Language groups sit under numeric keys next to `count` and `specials`,
/// so the matrix is decoded loosely and walked by key.
#[derive(Debug, Deserialize)]
pub(super) struct SiteMatrixResponseDto {
    #[serde(default)]
    sitematrix: BTreeMap<String, Value>,
    error: Option<ApiErrorDto>,
}

#[derive(Debug, Deserialize)]
struct LanguageGroupDto {
    #[serde(default)]
    site: Vec<SiteDto>,
}

#[derive(Debug, Deserialize)]
struct SiteDto {
    dbname: String,
    url: String,
}

impl SiteMatrixResponseDto {
    /// Map every site db name to its action API endpoint.
    pub(super) fn into_endpoints(self) -> Result<HashMap<String, Url>, WatchlistSourceError> {
        if let Some(error) = self.error {
            return Err(error.into_source_error());
        }
        let mut sites = Vec::new();
        for (key, value) in self.sitematrix {
            if key == "specials" {
                let specials: Vec<SiteDto> = serde_json::from_value(value).map_err(|error| {
                    WatchlistSourceError::decode(format!("invalid sitematrix specials: {error}"))
                })?;
                sites.extend(specials);
            } else if key.parse::<u32>().is_ok() {
                let group: LanguageGroupDto = serde_json::from_value(value).map_err(|error| {
                    WatchlistSourceError::decode(format!("invalid sitematrix group {key}: {error}"))
                })?;
                sites.extend(group.site);
            }
        }

        sites
            .into_iter()
            .map(|site| action_api_url(&site.url).map(|endpoint| (site.dbname, endpoint)))
            .collect()
    }
}

/// `https://<host>/w/api.php` for a site base URL, whatever scheme it lists.
fn action_api_url(base: &str) -> Result<Url, WatchlistSourceError> {
    let host = base
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("//")
        .trim_end_matches('/');
    Url::parse(&format!("https://{host}/w/api.php")).map_err(|error| {
        WatchlistSourceError::decode(format!("invalid site url `{base}`: {error}"))
    })
}
