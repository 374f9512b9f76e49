//! Registry
//!
//! Owns one tracker per sysmeta service and one resolver per resolver id.
//! Built once by the composition root and passed to whoever needs lookups.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::auth::TokenProvider;
use crate::config::{normalize_url, tracker_store_name, ResolverConfig, ServiceConfig, TrackerConfig};
use crate::error::Result;
use crate::index::SolrIndex;
use crate::resolver::ResourceMapResolver;
use crate::store::SqliteStore;
use crate::sysmeta::{HttpSysMetaService, SysMetaFetcher};
use crate::tracker::VersionTracker;
use crate::verifier::HttpMemberService;

#[derive(Default)]
pub struct Registry {
    trackers: Mutex<HashMap<String, Arc<VersionTracker>>>,
    resolvers: Mutex<HashMap<String, Arc<ResourceMapResolver>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tracker bound to `meta_service_url`, built by `make` on first use
    pub async fn tracker_or_insert_with<F, Fut>(&self, meta_service_url: &str, make: F) -> Result<Arc<VersionTracker>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<VersionTracker>>,
    {
        let key = normalize_url(meta_service_url);
        let mut trackers = self.trackers.lock().await;
        if let Some(existing) = trackers.get(&key) {
            return Ok(existing.clone());
        }
        let tracker = Arc::new(make().await?);
        trackers.insert(key.clone(), tracker.clone());
        info!(meta_service_url = %key, "registered version tracker");
        Ok(tracker)
    }

    /// The resolver named `id`, built by `make` on first use
    pub async fn resolver_or_insert_with<F, Fut>(&self, id: &str, make: F) -> Result<Arc<ResourceMapResolver>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResourceMapResolver>>,
    {
        let mut resolvers = self.resolvers.lock().await;
        if let Some(existing) = resolvers.get(id) {
            return Ok(existing.clone());
        }
        let resolver = Arc::new(make().await?);
        resolvers.insert(id.to_string(), resolver.clone());
        info!(id, "registered resolver");
        Ok(resolver)
    }

    pub async fn tracker(&self, meta_service_url: &str) -> Option<Arc<VersionTracker>> {
        self.trackers.lock().await.get(&normalize_url(meta_service_url)).cloned()
    }

    pub async fn resolver(&self, id: &str) -> Option<Arc<ResourceMapResolver>> {
        self.resolvers.lock().await.get(id).cloned()
    }

    /// Tracker over the HTTP sysmeta service, persisted in SQLite
    pub async fn http_tracker(
        &self,
        services: &ServiceConfig,
        config: TrackerConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Arc<VersionTracker>> {
        self.tracker_or_insert_with(&services.meta_service_url, || async {
            let service = Arc::new(HttpSysMetaService::new(&services.meta_service_url)?);
            let fetcher = Arc::new(SysMetaFetcher::new(service, tokens));
            let store = SqliteStore::new(
                &services.db_path,
                tracker_store_name(&services.meta_service_url),
            )
            .await?;
            VersionTracker::new(config, fetcher, Arc::new(store))
        })
        .await
    }

    /// Resolver over the HTTP index and object services, sharing the tracker
    /// for the configured sysmeta service (built with `services.tracker`)
    pub async fn http_resolver(
        &self,
        services: &ServiceConfig,
        config: ResolverConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Arc<ResourceMapResolver>> {
        let tracker = self
            .http_tracker(services, services.tracker.clone(), tokens.clone())
            .await?;
        let id = config.id.clone();
        self.resolver_or_insert_with(&id, || async {
            let index = Arc::new(SolrIndex::new(&services.query_service_url, tokens.clone())?);
            let members = Arc::new(HttpMemberService::new(&services.object_service_url, tokens)?);
            let storage = SqliteStore::new(&services.db_path, config.storage_name()).await?;
            ResourceMapResolver::new(config, index, tracker, members, Arc::new(storage))
        })
        .await
    }
}
