//! Multi-Strategy Resolver
//!
//! Finds the resource map that aggregates a document. Strategies run in a
//! fixed order and stop at the first accepted answer:
//!
//! 1. index: trusted when it names exactly one resource map
//! 2. storage: a pair remembered from an earlier resolution
//! 3. sysmeta: walk back through revisions until one is indexed, then walk
//!    the resource map's chain forward the same number of steps
//! 4. guess: the conventional `resource_map_<pid>` name
//!
//! Anything not coming from the index is verified against the resource map's
//! member list before it is accepted. Every step is recorded in a per-PID
//! event log and published on the event bus.

mod status;
mod strategies;

pub use status::{ResolutionResult, ResolverEvent, Status, Strategy};

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::error::{ResolverError, Result, StoreError};
use crate::events::{EventBus, EventLog, EventMeta, Level, LogEvent, NewEvent, PidLog, PidSubscription};
use crate::index::SearchIndex;
use crate::store::KeyValueStore;
use crate::tracker::VersionTracker;
use crate::verifier::{MemberService, Verification, Verifier};

/// The PID being resolved, plus the series id it was reached through
#[derive(Debug, Clone, Copy)]
struct Attempt<'a> {
    pid: &'a str,
    sid: Option<&'a str>,
}

pub struct ResourceMapResolver {
    config: ResolverConfig,
    index: Arc<dyn SearchIndex>,
    tracker: Arc<VersionTracker>,
    verifier: Verifier,
    storage: Arc<dyn KeyValueStore>,
    log: EventLog,
    events: EventBus<ResolverEvent>,
}

impl ResourceMapResolver {
    pub fn new(
        config: ResolverConfig,
        index: Arc<dyn SearchIndex>,
        tracker: Arc<VersionTracker>,
        members: Arc<dyn MemberService>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            verifier: Verifier::new(members, config.max_fetch_time),
            log: EventLog::new(config.max_log_events, config.max_logged_pids, config.console_level),
            config,
            index,
            tracker,
            storage,
            events: EventBus::default(),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<VersionTracker> {
        &self.tracker
    }

    /// Resolve the resource map for `pid`
    pub async fn resolve(&self, pid: &str) -> Result<ResolutionResult> {
        if pid.trim().is_empty() {
            return Err(ResolverError::invalid_argument("pid must not be empty"));
        }

        let mut log = Vec::new();
        let rm = self.run(Attempt { pid, sid: None }, &mut log).await;

        let result = ResolutionResult {
            success: rm.is_some(),
            pid: pid.to_string(),
            unauthorized: log.iter().any(|e| e.meta.unauthorized),
            multiple_rms: rm.is_none() && log.iter().any(|e| e.meta.rms.len() > 1),
            rm,
            log,
        };
        info!(pid, success = result.success, rm = ?result.rm, "resolution finished");
        Ok(result)
    }

    async fn run(&self, at: Attempt<'_>, trail: &mut Vec<LogEvent>) -> Option<String> {
        let pid = at.pid;

        // Index
        match self.search_index(pid).await {
            Ok(found) => {
                if let Some(rm) = found.rm {
                    self.status(
                        at,
                        trail,
                        Strategy::Index,
                        Status::IndexMatch,
                        Some(&rm),
                        found.meta,
                        None,
                    )
                    .await;
                    return Some(rm);
                }
                if found.meta.is_sid && at.sid.is_none() {
                    self.status(
                        at,
                        trail,
                        Strategy::Index,
                        Status::PidIsSeriesId,
                        None,
                        found.meta,
                        None,
                    )
                    .await;
                    return self.resolve_series(pid, trail).await;
                }
                if found.meta.rms.len() > 1 {
                    let (rm, mut meta) = self.reconcile_rms(&found.meta.rms).await;
                    meta.rms = found.meta.rms.clone();
                    if let Some(rm) = rm {
                        self.status(
                            at,
                            trail,
                            Strategy::Index,
                            Status::MultiRmMatch,
                            Some(&rm),
                            meta,
                            None,
                        )
                        .await;
                        return Some(rm);
                    }
                    self.status(at, trail, Strategy::Index, Status::MultiRmMiss, None, meta, None)
                        .await;
                }
                self.status(at, trail, Strategy::Index, Status::IndexMiss, None, found.meta, None)
                    .await;
            }
            Err(err) => {
                self.status(
                    at,
                    trail,
                    Strategy::Index,
                    Status::IndexMiss,
                    None,
                    EventMeta::default(),
                    Some(format!("{}: {}", err.code(), err.message)),
                )
                .await;
            }
        }

        // Storage
        if let Some(rm) = self.stored_pair(pid).await {
            if self.verify(at, trail, Strategy::Storage, &rm).await {
                self.status(
                    at,
                    trail,
                    Strategy::Storage,
                    Status::StorageMatch,
                    Some(&rm),
                    EventMeta::default(),
                    None,
                )
                .await;
                return Some(rm);
            }
        }
        self.status(
            at,
            trail,
            Strategy::Storage,
            Status::StorageMiss,
            None,
            EventMeta::default(),
            None,
        )
        .await;

        // Sysmeta
        let walk = self.walk_sysmeta(pid).await;
        if let Some(rm) = walk.rm.as_deref() {
            if self.verify(at, trail, Strategy::Sysmeta, rm).await {
                self.status(
                    at,
                    trail,
                    Strategy::Sysmeta,
                    Status::SysmetaMatch,
                    Some(rm),
                    walk.meta,
                    None,
                )
                .await;
                return walk.rm;
            }
        }
        if walk.meta.unauthorized {
            self.status(at, trail, Strategy::Sysmeta, Status::Unauthorized, None, walk.meta, None)
                .await;
            return None;
        }
        self.status(at, trail, Strategy::Sysmeta, Status::SysmetaMiss, None, walk.meta, None)
            .await;

        // Guess
        let guessed = format!("{}{}", self.config.guess_prefix, pid);
        if self.verify(at, trail, Strategy::Guess, &guessed).await {
            self.status(
                at,
                trail,
                Strategy::Guess,
                Status::GuessMatch,
                Some(&guessed),
                EventMeta::default(),
                None,
            )
            .await;
            return Some(guessed);
        }
        let meta = EventMeta {
            guessed_pid: Some(guessed),
            ..EventMeta::default()
        };
        self.status(at, trail, Strategy::Guess, Status::GuessMiss, None, meta, None).await;

        self.status(at, trail, Strategy::Resolve, Status::AllMiss, None, EventMeta::default(), None)
            .await;
        None
    }

    /// Resolve the current revision of a series, logging under the series id too
    async fn resolve_series(&self, sid: &str, trail: &mut Vec<LogEvent>) -> Option<String> {
        let at = Attempt { pid: sid, sid: None };
        // The series may have moved on since it was last seen
        let current = match self.tracker.get_sys_meta(sid, true).await {
            Ok(meta) if !meta.identifier.is_empty() && meta.identifier != sid => meta.identifier.clone(),
            Ok(_) => {
                self.status(
                    at,
                    trail,
                    Strategy::Series,
                    Status::NoPidForSeriesId,
                    None,
                    EventMeta::default(),
                    None,
                )
                .await;
                return None;
            }
            Err(err) => {
                self.status(
                    at,
                    trail,
                    Strategy::Series,
                    Status::NoPidForSeriesId,
                    None,
                    EventMeta::default(),
                    Some(err.to_string()),
                )
                .await;
                return None;
            }
        };

        debug!(sid, pid = %current, "resolving series through its current revision");
        Box::pin(self.run(
            Attempt {
                pid: &current,
                sid: Some(sid),
            },
            trail,
        ))
        .await
    }

    /// Verify `rm` for the attempt's PID; a failed check purges a matching stored pair
    async fn verify(
        &self,
        at: Attempt<'_>,
        trail: &mut Vec<LogEvent>,
        strategy: Strategy,
        rm: &str,
    ) -> bool {
        let outcome = self.verifier.verify(rm, at.pid).await;
        let mut meta = EventMeta {
            candidate: Some(rm.to_string()),
            rm_members: outcome.members().map(<[String]>::to_vec),
            ..EventMeta::default()
        };

        match outcome {
            Verification::Valid { .. } => {
                self.status(at, trail, strategy, Status::FoundAndValid, Some(rm), meta, None)
                    .await;
                return true;
            }
            Verification::NotMember { .. } => {
                warn!(pid = at.pid, rm, strategy = %strategy, "resource map does not list document");
                self.status(at, trail, strategy, Status::FoundButNotValid, None, meta, None).await;
            }
            Verification::FetchFailed { status, reason } => {
                meta.rm_members = None;
                let code = status.map(|s| s.to_string()).unwrap_or_else(|| "UNKNOWN".to_string());
                self.status(
                    at,
                    trail,
                    strategy,
                    Status::RmFetchError,
                    None,
                    meta,
                    Some(format!("{code}: {reason}")),
                )
                .await;
            }
        }

        self.purge_pair(at.pid, rm).await;
        false
    }

    /// Record a status update: event log, bus, and the stored pair when `rm` is set.
    ///
    /// `trail` collects the entries of the current call, keyed by the PID the
    /// caller asked about.
    async fn status(
        &self,
        at: Attempt<'_>,
        trail: &mut Vec<LogEvent>,
        strategy: Strategy,
        status: Status,
        rm: Option<&str>,
        meta: EventMeta,
        error: Option<String>,
    ) {
        let entry = self.emit(at.pid, strategy, status, rm, meta.clone(), error.clone());

        if let Some(rm) = rm {
            self.add_to_storage(at.pid, rm).await.ok();
        }

        match at.sid {
            Some(sid) => {
                let meta = EventMeta {
                    sid: Some(sid.to_string()),
                    ..meta
                };
                trail.push(self.emit(sid, strategy, status, rm, meta, error));
            }
            None => trail.push(entry),
        }
    }

    fn emit(
        &self,
        pid: &str,
        strategy: Strategy,
        status: Status,
        rm: Option<&str>,
        meta: EventMeta,
        error: Option<String>,
    ) -> LogEvent {
        let level = if error.is_some() && status.level() < Level::Warning {
            Level::Warning
        } else {
            status.level()
        };
        let entry = self.log.record(NewEvent {
            pid: pid.to_string(),
            strategy: strategy.as_str().to_string(),
            success: status.is_success(),
            level,
            message: format!("Status: {}", status.message()),
            rm: rm.map(str::to_string),
            error,
            meta: meta.clone(),
        });
        self.events.publish(ResolverEvent {
            pid: pid.to_string(),
            rm: rm.map(str::to_string),
            status,
            strategy,
            meta,
        });
        entry
    }

    async fn stored_pair(&self, pid: &str) -> Option<String> {
        match self.storage.get_item(pid).await {
            Ok(Some(Value::String(rm))) if !rm.is_empty() => Some(rm),
            Ok(_) => None,
            Err(err) => {
                debug!(pid, error = %err, "pair lookup failed");
                None
            }
        }
    }

    async fn purge_pair(&self, pid: &str, rm: &str) {
        if self.stored_pair(pid).await.as_deref() != Some(rm) {
            return;
        }
        match self.storage.remove_item(pid).await {
            Ok(()) => debug!(pid, rm, "purged stale pair"),
            Err(err) => warn!(pid, rm, error = %err, "failed to purge stale pair"),
        }
    }

    /// Remember that `rm` aggregates `pid`.
    ///
    /// When the store is full it is cleared and the write retried once.
    /// Returns whether the pair was stored.
    pub async fn add_to_storage(&self, pid: &str, rm: &str) -> Result<bool> {
        if pid.trim().is_empty() || rm.trim().is_empty() {
            return Err(ResolverError::invalid_argument("pid and rm are required"));
        }

        match self.storage.set_item(pid, Value::String(rm.to_string())).await {
            Ok(()) => Ok(true),
            Err(StoreError::Full) => {
                warn!(pid, "pair store full, clearing before retry");
                self.storage.clear().await?;
                match self.storage.set_item(pid, Value::String(rm.to_string())).await {
                    Ok(()) => Ok(true),
                    Err(err) => {
                        warn!(pid, error = %err, "retry failed, pair not stored");
                        Ok(false)
                    }
                }
            }
            Err(err) => {
                warn!(pid, error = %err, "unexpected error storing pair");
                Ok(false)
            }
        }
    }

    /// Forget every stored pair
    pub async fn clear_storage(&self) -> Result<()> {
        self.storage.clear().await?;
        Ok(())
    }

    /// Entries in emission order, optionally for one PID
    pub fn get_trace(&self, pid: Option<&str>) -> Vec<LogEvent> {
        self.log.get_trace(pid)
    }

    pub fn get_log(&self, pid: &str) -> Option<PidLog> {
        self.log.get_log(pid)
    }

    pub fn clear_log(&self, pid: &str) {
        self.log.clear_log(pid);
    }

    pub fn set_console_level(&self, level: Option<Level>) {
        self.log.set_console_level(level);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResolverEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_pid(&self, pid: impl Into<String>) -> PidSubscription<ResolverEvent> {
        self.events.subscribe_pid(pid)
    }
}
