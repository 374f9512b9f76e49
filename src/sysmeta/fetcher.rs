//! Deduplicated sysmeta fetches.
//!
//! Concurrent callers asking for the same `(pid, token)` pair share a single
//! request; the entry is dropped as soon as that request settles.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::debug;

use super::{SysMeta, SysMetaService};
use crate::auth::TokenProvider;
use crate::error::FetchError;

type PendingFetch = Shared<BoxFuture<'static, Result<Arc<SysMeta>, FetchError>>>;

pub struct SysMetaFetcher {
    service: Arc<dyn SysMetaService>,
    tokens: Arc<dyn TokenProvider>,
    in_flight: Mutex<HashMap<(String, String), PendingFetch>>,
}

impl SysMetaFetcher {
    pub fn new(service: Arc<dyn SysMetaService>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            service,
            tokens,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch metadata for `pid`, joining an identical request already running
    pub async fn fetch(&self, pid: &str) -> Result<Arc<SysMeta>, FetchError> {
        let token = self.tokens.get_token().await;
        let key = (pid.to_string(), token.clone().unwrap_or_default());

        let pending = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!(pid, "joining in-flight sysmeta fetch");
                    existing.clone()
                }
                None => {
                    let service = self.service.clone();
                    let pid_owned = pid.to_string();
                    let fut = async move {
                        service
                            .fetch(&pid_owned, token.as_deref())
                            .await
                            .map(Arc::new)
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        let result = pending.clone().await;

        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(&key)
            .is_some_and(|current| current.ptr_eq(&pending))
        {
            in_flight.remove(&key);
        }
        result
    }

    /// Number of fetches currently running
    pub async fn pending(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Forget every pending fetch; callers already awaiting keep their handle
    pub async fn clear(&self) {
        self.in_flight.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoToken;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowService {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SysMetaService for SlowService {
        async fn fetch(&self, pid: &str, _token: Option<&str>) -> Result<SysMeta, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if pid == "broken" {
                return Err(FetchError::with_status(500, "boom"));
            }
            Ok(SysMeta::new(pid))
        }
    }

    #[tokio::test]
    async fn test_concurrent_fetches_are_deduplicated() {
        let service = Arc::new(SlowService { calls: AtomicUsize::new(0) });
        let fetcher = SysMetaFetcher::new(service.clone(), Arc::new(NoToken));

        let (a, b, c) = tokio::join!(fetcher.fetch("p1"), fetcher.fetch("p1"), fetcher.fetch("p1"));
        assert_eq!(a.unwrap().identifier, "p1");
        assert_eq!(b.unwrap().identifier, "p1");
        assert_eq!(c.unwrap().identifier, "p1");
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.pending().await, 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_shared_and_released() {
        let service = Arc::new(SlowService { calls: AtomicUsize::new(0) });
        let fetcher = SysMetaFetcher::new(service.clone(), Arc::new(NoToken));

        let (a, b) = tokio::join!(fetcher.fetch("broken"), fetcher.fetch("broken"));
        assert_eq!(a.unwrap_err().status, Some(500));
        assert!(b.is_err());
        assert_eq!(fetcher.pending().await, 0);

        // A settled failure is not cached; the next call hits the service again
        let _ = fetcher.fetch("broken").await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }
}
