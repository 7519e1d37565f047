//! Per-site namespace tables, fetched once and cached for the process.
//!
//! Concurrent lookups of a cold site share one fetch, so a scheduled pass
//! over many watch-lists on the same site spends a single `siteinfo` call.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;
use tracing::debug;

use crate::domain::is_subject_namespace;
use crate::domain::ports::{NamespaceInfo, WatchlistSource, WatchlistSourceError};
use crate::domain::request_queue::QueuePriority;

/// Namespace table of one site, keyed by namespace id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SiteNamespaces {
    namespaces: BTreeMap<i32, NamespaceInfo>,
}

impl SiteNamespaces {
    /// Index `namespaces` by id.
    #[must_use]
    pub fn new(namespaces: impl IntoIterator<Item = NamespaceInfo>) -> Self {
        Self {
            namespaces: namespaces.into_iter().map(|ns| (ns.id, ns)).collect(),
        }
    }

    /// Look up one namespace.
    #[must_use]
    pub fn get(&self, id: i32) -> Option<&NamespaceInfo> {
        self.namespaces.get(&id)
    }

    /// Ids of every subject namespace, ascending.
    #[must_use]
    pub fn subject_ids(&self) -> Vec<i32> {
        self.namespaces
            .keys()
            .copied()
            .filter(|id| is_subject_namespace(*id))
            .collect()
    }

    /// Number of namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

type SiteCell = Arc<OnceCell<Arc<SiteNamespaces>>>;

/// Process-wide cache of site namespace tables.
pub struct NamespaceCatalog {
    source: Arc<dyn WatchlistSource>,
    cache: Mutex<HashMap<String, SiteCell>>,
}

impl NamespaceCatalog {
    /// Build an empty catalog reading through `source`.
    #[must_use]
    pub fn new(source: Arc<dyn WatchlistSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Namespace table of `site`, fetched on first use.
    ///
    /// Callers racing on a cold site wait for the same fetch.
    ///
    /// # Errors
    ///
    /// Propagates the source error of the fetch; failures are not cached and
    /// the next lookup fetches again.
    pub async fn namespaces(
        &self,
        site: &str,
        priority: QueuePriority,
    ) -> Result<Arc<SiteNamespaces>, WatchlistSourceError> {
        let cell = self.cell(site);
        let table = cell
            .get_or_try_init(|| async {
                let infos = self.source.fetch_namespaces(site, priority).await?;
                let fetched = SiteNamespaces::new(infos);
                debug!(site, namespaces = fetched.len(), "namespace table cached");
                Ok::<_, WatchlistSourceError>(Arc::new(fetched))
            })
            .await?;
        Ok(Arc::clone(table))
    }

    fn cell(&self, site: &str) -> SiteCell {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cache.entry(site.to_owned()).or_default())
    }
}
