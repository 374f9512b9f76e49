//! Hand-written mock services shared by the integration suites.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use resmap_resolver::auth::NoToken;
use resmap_resolver::config::{ResolverConfig, TrackerConfig};
use resmap_resolver::error::FetchError;
use resmap_resolver::events::Level;
use resmap_resolver::index::{IndexDoc, IndexField, IndexQuery, SearchIndex};
use resmap_resolver::store::{KeyValueStore, MemoryStore};
use resmap_resolver::sysmeta::{SysMeta, SysMetaFetcher, SysMetaService};
use resmap_resolver::tracker::VersionTracker;
use resmap_resolver::verifier::{MemberList, MemberService};
use resmap_resolver::ResourceMapResolver;

/// Sysmeta keyed by PID; unknown PIDs answer 404
#[derive(Default)]
pub struct MockSysMeta {
    records: Mutex<HashMap<String, Result<SysMeta, FetchError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockSysMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Register `pids` as one linear chain, oldest first
    pub async fn chain(&self, pids: &[&str]) {
        let mut records = self.records.lock().await;
        for (i, pid) in pids.iter().enumerate() {
            let mut meta = SysMeta::new(*pid);
            if i > 0 {
                meta = meta.with_obsoletes(pids[i - 1]);
            }
            if i + 1 < pids.len() {
                meta = meta.with_obsoleted_by(pids[i + 1]);
            }
            records.insert(pid.to_string(), Ok(meta));
        }
    }

    pub async fn insert(&self, meta: SysMeta) {
        self.records.lock().await.insert(meta.identifier.clone(), Ok(meta));
    }

    /// Answer `pid` under another identifier, like a series id does
    pub async fn alias(&self, pid: &str, meta: SysMeta) {
        self.records.lock().await.insert(pid.to_string(), Ok(meta));
    }

    pub async fn fail(&self, pid: &str, status: u16) {
        self.records.lock().await.insert(
            pid.to_string(),
            Err(FetchError::with_status(status, format!("Failed to fetch SysMeta: {status}"))),
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SysMetaService for MockSysMeta {
    async fn fetch(&self, pid: &str, _token: Option<&str>) -> Result<SysMeta, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.records
            .lock()
            .await
            .get(pid)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::with_status(404, format!("{pid} not found"))))
    }
}

/// Index documents keyed by the PID they answer for
#[derive(Default)]
pub struct MockIndex {
    docs: Mutex<HashMap<String, Vec<IndexDoc>>>,
    failures: Mutex<HashMap<String, u16>>,
    queries: Mutex<Vec<String>>,
}

impl MockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, pid: &str, docs: Vec<IndexDoc>) {
        self.docs.lock().await.insert(pid.to_string(), docs);
    }

    pub async fn fail(&self, pid: &str, status: u16) {
        self.failures.lock().await.insert(pid.to_string(), status);
    }

    pub async fn queries(&self) -> Vec<String> {
        self.queries.lock().await.clone()
    }
}

#[async_trait]
impl SearchIndex for MockIndex {
    async fn query(&self, filter: &IndexQuery, _fields: &[IndexField]) -> Result<Vec<IndexDoc>, FetchError> {
        let IndexQuery::IdOrSeriesId(pid) = filter;
        self.queries.lock().await.push(pid.clone());
        if let Some(status) = self.failures.lock().await.get(pid) {
            return Err(FetchError::with_status(*status, format!("query for {pid} failed")));
        }
        Ok(self.docs.lock().await.get(pid).cloned().unwrap_or_default())
    }
}

/// Resource map members keyed by map PID; unknown maps answer 404
#[derive(Default)]
pub struct MockMembers {
    maps: Mutex<HashMap<String, Vec<String>>>,
    requested: Mutex<Vec<String>>,
}

impl MockMembers {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, rm: &str, members: &[&str]) {
        self.maps
            .lock()
            .await
            .insert(rm.to_string(), members.iter().map(|m| m.to_string()).collect());
    }

    pub async fn requested(&self) -> Vec<String> {
        self.requested.lock().await.clone()
    }
}

#[async_trait]
impl MemberService for MockMembers {
    async fn fetch_members(&self, rm: &str, _timeout: Duration) -> Result<MemberList, FetchError> {
        self.requested.lock().await.push(rm.to_string());
        match self.maps.lock().await.get(rm) {
            Some(members) => Ok(MemberList {
                member_ids: members.clone(),
                http_status: 200,
            }),
            None => Err(FetchError::with_status(404, format!("{rm} not found"))),
        }
    }
}

pub fn metadata_doc(id: &str, rms: &[&str]) -> IndexDoc {
    IndexDoc {
        id: Some(id.to_string()),
        resource_map: rms.iter().map(|s| s.to_string()).collect(),
        format_id: Some("https://eml.ecoinformatics.org/eml-2.2.0".to_string()),
        format_type: Some("METADATA".to_string()),
        ..IndexDoc::default()
    }
}

pub fn tracker(service: Arc<MockSysMeta>, store: Arc<dyn KeyValueStore>, config: TrackerConfig) -> VersionTracker {
    let fetcher = Arc::new(SysMetaFetcher::new(service, Arc::new(NoToken)));
    VersionTracker::new(config, fetcher, store).unwrap()
}

/// A resolver wired to fresh mocks
pub struct Harness {
    pub sysmeta: Arc<MockSysMeta>,
    pub index: Arc<MockIndex>,
    pub members: Arc<MockMembers>,
    pub storage: Arc<MemoryStore>,
    pub resolver: ResourceMapResolver,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ResolverConfig {
            console_level: Some(Level::Error),
            ..ResolverConfig::default()
        })
    }

    pub fn with_config(config: ResolverConfig) -> Self {
        Self::with_storage(config, Arc::new(MemoryStore::new()))
    }

    pub fn with_storage(config: ResolverConfig, storage: Arc<MemoryStore>) -> Self {
        Self::build(config, storage, Arc::new(MockSysMeta::new()))
    }

    /// Quiet resolver over a sysmeta service that answers after `delay`
    pub fn with_slow_sysmeta(delay: Duration) -> Self {
        let config = ResolverConfig {
            console_level: Some(Level::Error),
            ..ResolverConfig::default()
        };
        Self::build(config, Arc::new(MemoryStore::new()), Arc::new(MockSysMeta::with_delay(delay)))
    }

    fn build(config: ResolverConfig, storage: Arc<MemoryStore>, sysmeta: Arc<MockSysMeta>) -> Self {
        let index = Arc::new(MockIndex::new());
        let members = Arc::new(MockMembers::new());
        let tracker = tracker(sysmeta.clone(), Arc::new(MemoryStore::new()), TrackerConfig::default());
        let resolver = ResourceMapResolver::new(
            config,
            index.clone(),
            Arc::new(tracker),
            members.clone(),
            storage.clone(),
        )
        .unwrap();
        Self {
            sysmeta,
            index,
            members,
            storage,
            resolver,
        }
    }
}
