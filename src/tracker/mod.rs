//! Version Chain Store
//!
//! Tracks the obsolescence chain of every PID it has seen. Records live in a
//! bounded in-memory LRU backed by a durable namespace with a TTL. Chains are
//! filled lazily: asking for the Nth revision walks sysmeta links only as far
//! as needed, and every hop writes the reverse link into the neighbor.
//!
//! Walks from the same starting PID are serialized; walks from different
//! PIDs run concurrently and share in-flight sysmeta fetches.

mod record;

pub use record::{
    Adjacent, ChainError, ChainEvent, ChainSnapshot, Direction, PersistedRecord, VersionRecord,
};

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{FetchError, ResolverError, Result};
use crate::events::{EventBus, PidSubscription};
use crate::store::KeyValueStore;
use crate::sysmeta::{SysMeta, SysMetaFetcher};

type RecordHandle = Arc<Mutex<VersionRecord>>;

pub struct VersionTracker {
    max_chain_hops: usize,
    ttl_ms: AtomicU64,
    fetcher: Arc<SysMetaFetcher>,
    store: Arc<dyn KeyValueStore>,
    cache: Mutex<LruCache<String, RecordHandle>>,
    fill_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    events: EventBus<ChainEvent>,
}

impl VersionTracker {
    pub fn new(
        config: TrackerConfig,
        fetcher: Arc<SysMetaFetcher>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.max_cache_records)
            .ok_or_else(|| ResolverError::invalid_argument("max_cache_records must be positive"))?;
        Ok(Self {
            max_chain_hops: config.max_chain_hops,
            ttl_ms: AtomicU64::new(duration_ms(config.ttl)),
            fetcher,
            store,
            cache: Mutex::new(LruCache::new(capacity)),
            fill_locks: Mutex::new(HashMap::new()),
            events: EventBus::default(),
        })
    }

    pub fn max_chain_hops(&self) -> usize {
        self.max_chain_hops
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }

    /// The PID `offset` revisions away from `pid`.
    ///
    /// Positive offsets move toward newer revisions, negative toward older.
    /// Returns `None` when the chain ends first or a needed fetch failed;
    /// `ignore_end` re-checks a chain previously marked complete.
    pub async fn get_nth(&self, pid: &str, offset: i64, ignore_end: bool) -> Result<Option<String>> {
        self.check_pid(pid)?;
        let steps = self.check_offset(offset)?;
        if steps == 0 {
            self.handle(pid).await;
            return Ok(Some(pid.to_string()));
        }

        let dir = Direction::of_offset(offset);
        self.fill(pid, steps, dir, ignore_end).await;

        let rec = self.handle(pid).await;
        let rec = rec.lock().await;
        Ok(dir.list(&rec).get(steps - 1).cloned())
    }

    /// Every known revision before and after `pid`, walking both directions
    /// up to the hop limit
    pub async fn get_full_chain(&self, pid: &str, ignore_end: bool) -> Result<ChainSnapshot> {
        self.check_pid(pid)?;
        tokio::join!(
            self.fill(pid, self.max_chain_hops, Direction::Backward, ignore_end),
            self.fill(pid, self.max_chain_hops, Direction::Forward, ignore_end),
        );
        Ok(self.record(pid).await)
    }

    /// Immediate neighbors of `pid`
    pub async fn get_adjacent(&self, pid: &str) -> Result<Adjacent> {
        self.check_pid(pid)?;
        let (prev, next) = tokio::join!(self.get_nth(pid, -1, false), self.get_nth(pid, 1, false));
        Ok(Adjacent {
            pid: pid.to_string(),
            prev: prev?,
            next: next?,
        })
    }

    /// Metadata for `pid`, from this process's cache unless `fresh`
    pub async fn get_sys_meta(&self, pid: &str, fresh: bool) -> Result<Arc<SysMeta>> {
        self.check_pid(pid)?;
        Ok(self.live_sys_meta(pid, fresh).await?)
    }

    /// Drop everything known about `pid` and rebuild its chain
    pub async fn refresh(&self, pid: &str) -> Result<ChainSnapshot> {
        self.check_pid(pid)?;
        if let Err(err) = self.store.remove_item(pid).await {
            warn!(pid, error = %err, "failed to remove persisted version record");
        }
        self.cache.lock().await.pop(pid);
        self.get_full_chain(pid, false).await
    }

    /// Empty both tiers
    pub async fn clear(&self) -> Result<()> {
        self.cache.lock().await.clear();
        self.fetcher.clear().await;
        self.store.clear().await?;
        info!("version tracker cleared");
        Ok(())
    }

    /// Change the durable-tier TTL for subsequent loads
    pub fn set_ttl(&self, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(ResolverError::invalid_argument("TTL must be positive"));
        }
        self.ttl_ms.store(duration_ms(ttl), Ordering::Relaxed);
        Ok(())
    }

    /// Declare `new` as the revision right after `prev`.
    ///
    /// `prev` must be the tip of its chain and `new` must be isolated.
    /// Passing `sys_meta` for `new` skips fetching it.
    pub async fn add_version(&self, prev: &str, new: &str, sys_meta: Option<SysMeta>) -> Result<()> {
        self.check_pid(prev)?;
        self.check_pid(new)?;
        if prev == new {
            return Err(ResolverError::invalid_state(format!(
                "cannot add {new} as a new version of itself"
            )));
        }

        self.fill(prev, 1, Direction::Forward, false).await;
        let prev_rec = self.handle(prev).await;
        let new_rec = self.handle(new).await;

        let declared = sys_meta.is_some();
        if !declared {
            self.fill(new, 1, Direction::Backward, false).await;
        }

        let ancestors = {
            let (mut p, mut n) = lock_pair(&prev_rec, prev, &new_rec, new).await;

            if p.next.iter().chain(p.prev.iter()).any(|pid| pid == new) {
                return Err(ResolverError::invalid_state(format!(
                    "{new} is already in the chain of {prev}"
                )));
            }
            if !(p.end_next && p.next.is_empty()) {
                return Err(ResolverError::invalid_state(format!(
                    "{prev} is not the latest version in its chain"
                )));
            }
            if !((declared || n.end_prev) && n.prev.is_empty() && n.next.is_empty()) {
                return Err(ResolverError::invalid_state(format!(
                    "{new} already belongs to a version chain"
                )));
            }

            p.next = vec![new.to_string()];
            p.end_next = true;
            if let Some(meta) = p.sys_meta.take() {
                let mut updated = (*meta).clone();
                updated.obsoleted_by = Some(new.to_string());
                p.sys_meta = Some(Arc::new(updated));
            }

            let mut chain = Vec::with_capacity(p.prev.len() + 1);
            chain.push(prev.to_string());
            chain.extend(p.prev.iter().cloned());
            n.prev = chain;
            n.end_prev = p.end_prev;
            n.end_next = true;
            if let Some(meta) = sys_meta {
                n.descriptive = Some(meta.fields.clone());
                n.sys_meta = Some(Arc::new(meta));
            }

            p.prev.clone()
        };

        self.persist(prev, &prev_rec).await;
        self.persist(new, &new_rec).await;
        self.notify(prev, &prev_rec).await;
        self.notify(new, &new_rec).await;

        // Ancestors whose forward list already reached `prev` gain `new`
        for (i, ancestor) in ancestors.iter().enumerate() {
            let handle = self.handle(ancestor).await;
            let extended = {
                let mut rec = handle.lock().await;
                if rec.next.len() == i + 1 && rec.next.last().is_some_and(|p| p == prev) {
                    rec.next.push(new.to_string());
                    true
                } else {
                    false
                }
            };
            if extended {
                self.persist(ancestor, &handle).await;
                self.notify(ancestor, &handle).await;
            }
        }

        info!(prev, new, "added version");
        Ok(())
    }

    /// Snapshot of the current record for `pid`, loading it if necessary
    pub async fn record(&self, pid: &str) -> ChainSnapshot {
        let rec = self.handle(pid).await;
        let rec = rec.lock().await;
        rec.snapshot(pid)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_pid(&self, pid: impl Into<String>) -> PidSubscription<ChainEvent> {
        self.events.subscribe_pid(pid)
    }

    /// Number of records held in memory
    pub async fn cached_records(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Whether `pid` is held in memory, without touching its recency
    pub async fn is_cached(&self, pid: &str) -> bool {
        self.cache.lock().await.contains(pid)
    }

    fn check_pid(&self, pid: &str) -> Result<()> {
        if pid.trim().is_empty() {
            return Err(ResolverError::invalid_argument("pid must not be empty"));
        }
        Ok(())
    }

    fn check_offset(&self, offset: i64) -> Result<usize> {
        let steps = usize::try_from(offset.unsigned_abs()).unwrap_or(usize::MAX);
        if steps > self.max_chain_hops {
            return Err(ResolverError::invalid_argument(format!(
                "offset {offset} exceeds the maximum of {} hops",
                self.max_chain_hops
            )));
        }
        Ok(steps)
    }

    /// Shared handle for `pid`, restoring it from the durable tier on a miss
    async fn handle(&self, pid: &str) -> RecordHandle {
        let mut cache = self.cache.lock().await;
        if let Some(existing) = cache.get(pid) {
            return existing.clone();
        }

        let handle: RecordHandle = Arc::new(Mutex::new(VersionRecord::default()));
        // Hold the record until it is loaded so concurrent readers wait for it
        let mut guard = handle.clone().lock_owned().await;
        if let Some((evicted, _)) = cache.push(pid.to_string(), handle.clone()) {
            debug!(pid = %evicted, "evicted version record from memory");
        }
        drop(cache);

        if let Some(saved) = self.load(pid).await {
            guard.restore(saved);
        }
        handle
    }

    async fn load(&self, pid: &str) -> Option<PersistedRecord> {
        let value = match self.store.get_item(pid).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(err) => {
                warn!(pid, error = %err, "failed to read persisted version record");
                return None;
            }
        };

        let saved: PersistedRecord = match serde_json::from_value(value) {
            Ok(saved) => saved,
            Err(err) => {
                warn!(pid, error = %err, "discarding unreadable version record");
                self.purge(pid).await;
                return None;
            }
        };

        let age = now_ms().saturating_sub(saved.ts);
        if age > self.ttl_ms.load(Ordering::Relaxed) as i64 {
            debug!(pid, age_ms = age, "persisted version record expired");
            self.purge(pid).await;
            return None;
        }
        Some(saved)
    }

    async fn purge(&self, pid: &str) {
        if let Err(err) = self.store.remove_item(pid).await {
            warn!(pid, error = %err, "failed to remove version record");
        }
    }

    async fn persist(&self, pid: &str, handle: &RecordHandle) {
        let saved = handle.lock().await.to_persisted(now_ms());
        let value = match serde_json::to_value(&saved) {
            Ok(value) => value,
            Err(err) => {
                warn!(pid, error = %err, "failed to encode version record");
                return;
            }
        };
        if let Err(err) = self.store.set_item(pid, value).await {
            warn!(pid, error = %err, "failed to persist version record");
        }
    }

    async fn notify(&self, pid: &str, handle: &RecordHandle) {
        let snapshot = handle.lock().await.snapshot(pid);
        self.events.publish(ChainEvent::Updated {
            pid: pid.to_string(),
            snapshot,
        });
    }

    async fn live_sys_meta(&self, pid: &str, fresh: bool) -> Result<Arc<SysMeta>, FetchError> {
        let handle = self.handle(pid).await;
        if !fresh {
            if let Some(meta) = handle.lock().await.sys_meta.clone() {
                return Ok(meta);
            }
        }

        let meta = self.fetcher.fetch(pid).await?;
        let mut rec = handle.lock().await;
        rec.descriptive = Some(meta.fields.clone());
        rec.sys_meta = Some(meta.clone());
        Ok(meta)
    }

    /// Walk from `start` until `steps` entries are known in `dir`
    async fn fill(&self, start: &str, steps: usize, dir: Direction, ignore_end: bool) {
        let steps = steps.min(self.max_chain_hops);
        let lock = {
            let mut locks = self.fill_locks.lock().await;
            locks.entry(start.to_string()).or_default().clone()
        };

        {
            let _walking = lock.lock().await;
            self.fill_locked(start, steps, dir, ignore_end).await;
        }

        let mut locks = self.fill_locks.lock().await;
        // The map and this call hold the only references once nobody waits
        if Arc::strong_count(&lock) == 2 {
            locks.remove(start);
        }
    }

    async fn fill_locked(&self, start: &str, steps: usize, dir: Direction, ignore_end: bool) {
        let handle = self.handle(start).await;

        let mut current = {
            let mut rec = handle.lock().await;
            rec.errors.retain(|e| e.direction != dir);
            if ignore_end {
                dir.set_end(&mut rec, false);
            }
            if dir.list(&rec).len() >= steps || dir.at_end(&rec) {
                return;
            }
            dir.list(&rec).last().cloned().unwrap_or_else(|| start.to_string())
        };

        let mut changed = false;
        loop {
            let meta = match self.live_sys_meta(&current, ignore_end).await {
                Ok(meta) => meta,
                Err(err) => {
                    debug!(pid = %current, error = %err, "chain walk stopped on fetch failure");
                    handle.lock().await.errors.push(ChainError {
                        pid: current.clone(),
                        direction: dir,
                        error: format!("Failed to fetch SysMeta: {err}"),
                        error_code: err.code(),
                    });
                    self.notify(start, &handle).await;
                    break;
                }
            };

            let Some(neighbor) = dir.adjacent(&meta).map(str::to_string) else {
                dir.set_end(&mut *handle.lock().await, true);
                changed = true;
                self.notify(start, &handle).await;
                break;
            };

            let index = {
                let mut rec = handle.lock().await;
                let list = dir.list(&rec);
                if neighbor == start || list.contains(&neighbor) {
                    warn!(pid = start, neighbor = %neighbor, "cycle in version chain");
                    rec.errors.push(ChainError {
                        pid: current.clone(),
                        direction: dir,
                        error: format!("Version chain loops back to {neighbor}"),
                        error_code: "CYCLE".to_string(),
                    });
                    None
                } else {
                    let list = dir.list_mut(&mut rec);
                    list.push(neighbor.clone());
                    Some((list.len() - 1, list.len() >= steps))
                }
            };
            let Some((index, done)) = index else {
                self.notify(start, &handle).await;
                break;
            };

            changed = true;
            self.notify(start, &handle).await;
            if current != start {
                self.link_back(&neighbor, &current, 0, dir).await;
            }
            self.link_back(&neighbor, start, index, dir).await;

            if done {
                break;
            }
            current = neighbor;
        }

        if changed {
            self.persist(start, &handle).await;
        }
    }

    /// Record `start` in the reverse list of `neighbor`, `index + 1` hops away
    async fn link_back(&self, neighbor: &str, start: &str, index: usize, dir: Direction) {
        let handle = self.handle(neighbor).await;
        let changed = {
            let mut rec = handle.lock().await;
            let reverse = dir.reverse().list_mut(&mut rec);
            if reverse.get(index).is_some_and(|p| p == start) {
                false
            } else if index < reverse.len() {
                reverse[index] = start.to_string();
                true
            } else if index == reverse.len() {
                reverse.push(start.to_string());
                true
            } else {
                false
            }
        };
        if changed {
            self.persist(neighbor, &handle).await;
            self.notify(neighbor, &handle).await;
        }
    }
}

/// Lock two distinct records in a stable order
async fn lock_pair<'a>(
    a: &'a RecordHandle,
    a_pid: &str,
    b: &'a RecordHandle,
    b_pid: &str,
) -> (
    tokio::sync::MutexGuard<'a, VersionRecord>,
    tokio::sync::MutexGuard<'a, VersionRecord>,
) {
    if a_pid <= b_pid {
        let first = a.lock().await;
        let second = b.lock().await;
        (first, second)
    } else {
        let second = b.lock().await;
        let first = a.lock().await;
        (first, second)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}
