//! Append-only event log, grouped per PID.
//!
//! Each PID gets its own log capped at `max_events`; the oldest entry is
//! evicted first. At most `max_logs` PIDs keep a log, the least recently
//! written one is dropped beyond that. A global sequence number orders
//! entries across logs.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Level::Info),
            "warning" | "warn" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            other => Err(format!("invalid log level: {other}")),
        }
    }
}

/// Structured details attached to an entry. Empty fields are not serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub is_sid: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub is_data: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub is_rm: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub rms: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub multiple_rms_not_versions: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub multiple_rms_all_obsoleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_back: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub past_pids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub chain_errors: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub unauthorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guessed_pid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rm_members: Option<Vec<String>>,
}

/// One entry in a PID's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub seq: u64,
    pub time: DateTime<Utc>,
    pub pid: String,
    pub strategy: String,
    pub success: bool,
    pub level: Level,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub meta: EventMeta,
}

/// Input to [`EventLog::record`]; sequence and time are assigned on insert
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub pid: String,
    pub strategy: String,
    pub success: bool,
    pub level: Level,
    pub message: String,
    pub rm: Option<String>,
    pub error: Option<String>,
    pub meta: EventMeta,
}

/// The events recorded for one PID
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PidLog {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub events: VecDeque<LogEvent>,
}

struct LogState {
    logs: LruCache<String, PidLog>,
    next_seq: u64,
}

pub struct EventLog {
    state: Mutex<LogState>,
    max_events: usize,
    console_level: Mutex<Option<Level>>,
}

impl EventLog {
    pub fn new(max_events: usize, max_logs: usize, console_level: Option<Level>) -> Self {
        let max_logs = NonZeroUsize::new(max_logs).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(LogState {
                logs: LruCache::new(max_logs),
                next_seq: 0,
            }),
            max_events: max_events.max(1),
            console_level: Mutex::new(console_level),
        }
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Minimum level mirrored to `tracing`; `None` silences mirroring
    pub fn set_console_level(&self, level: Option<Level>) {
        *self
            .console_level
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = level;
    }

    /// Append an entry to its PID's log
    pub fn record(&self, event: NewEvent) -> LogEvent {
        let entry = {
            let mut state = self.state();
            let seq = state.next_seq;
            state.next_seq += 1;

            let entry = LogEvent {
                seq,
                time: Utc::now(),
                pid: event.pid,
                strategy: event.strategy,
                success: event.success,
                level: event.level,
                message: event.message,
                rm: event.rm,
                error: event.error,
                meta: event.meta,
            };

            let log = state.logs.get_or_insert_mut(entry.pid.clone(), || PidLog {
                name: entry.pid.clone(),
                start_time: entry.time,
                events: VecDeque::new(),
            });
            while log.events.len() >= self.max_events {
                log.events.pop_front();
            }
            log.events.push_back(entry.clone());
            entry
        };

        self.mirror(&entry);
        entry
    }

    fn mirror(&self, entry: &LogEvent) {
        let threshold = *self
            .console_level
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(threshold) = threshold else { return };
        if entry.level < threshold {
            return;
        }
        let rm = entry.rm.as_deref().unwrap_or("-");
        match entry.level {
            Level::Info => info!(pid = %entry.pid, strategy = %entry.strategy, rm, "{}", entry.message),
            Level::Warning => warn!(pid = %entry.pid, strategy = %entry.strategy, rm, "{}", entry.message),
            Level::Error => error!(pid = %entry.pid, strategy = %entry.strategy, rm, "{}", entry.message),
        }
    }

    pub fn get_log(&self, pid: &str) -> Option<PidLog> {
        self.state().logs.peek(pid).cloned()
    }

    /// Number of PIDs currently holding a log
    pub fn len(&self) -> usize {
        self.state().logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().logs.is_empty()
    }

    /// All entries in emission order, optionally for one PID
    pub fn get_trace(&self, pid: Option<&str>) -> Vec<LogEvent> {
        let state = self.state();
        let mut events: Vec<LogEvent> = match pid {
            Some(pid) => state
                .logs
                .peek(pid)
                .map(|log| log.events.iter().cloned().collect())
                .unwrap_or_default(),
            None => state
                .logs
                .iter()
                .flat_map(|(_, log)| log.events.iter().cloned())
                .collect(),
        };
        events.sort_by_key(|e| e.seq);
        events
    }

    /// Empty a PID's log and reset its start time
    pub fn clear_log(&self, pid: &str) {
        if let Some(log) = self.state().logs.peek_mut(pid) {
            log.events.clear();
            log.start_time = Utc::now();
        }
    }

    pub fn clear(&self) {
        self.state().logs.clear();
    }
}
