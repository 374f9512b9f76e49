//! Version chain records and their persisted form.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::PidEvent;
use crate::sysmeta::{DescriptiveFields, SysMeta};

/// A neighbor fetch that failed during a walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainError {
    pub pid: String,
    /// Walk direction that hit the failure
    pub direction: Direction,
    pub error: String,
    pub error_code: String,
}

impl ChainError {
    /// 401/403 responses
    pub fn is_unauthorized(&self) -> bool {
        self.error_code == "401" || self.error_code == "403"
    }
}

/// What the tracker knows about one PID's neighbors.
///
/// `next[i]` is the revision `i + 1` hops newer, `prev[i]` the one `i + 1`
/// hops older. An end flag means the list is complete in that direction as
/// of the last walk.
#[derive(Debug, Clone, Default)]
pub struct VersionRecord {
    pub next: Vec<String>,
    pub prev: Vec<String>,
    pub end_next: bool,
    pub end_prev: bool,
    /// Metadata fetched from the service in this process
    pub sys_meta: Option<Arc<SysMeta>>,
    /// Descriptive fields, live or restored from the durable tier
    pub descriptive: Option<DescriptiveFields>,
    pub errors: Vec<ChainError>,
}

impl VersionRecord {
    pub(crate) fn restore(&mut self, saved: PersistedRecord) {
        self.next = saved.next.into_iter().filter(|p| !p.is_empty()).collect();
        self.prev = saved.prev.into_iter().filter(|p| !p.is_empty()).collect();
        self.end_next = saved.end_next;
        self.end_prev = saved.end_prev;
        self.descriptive = saved.sys_meta;
    }

    pub(crate) fn to_persisted(&self, ts: i64) -> PersistedRecord {
        let sys_meta = self
            .sys_meta
            .as_ref()
            .map(|m| m.fields.clone())
            .or_else(|| self.descriptive.clone())
            .filter(|f| !f.is_empty());
        PersistedRecord {
            next: self.next.clone(),
            prev: self.prev.clone(),
            end_next: self.end_next,
            end_prev: self.end_prev,
            sys_meta,
            ts,
        }
    }

    pub fn snapshot(&self, pid: &str) -> ChainSnapshot {
        ChainSnapshot {
            pid: pid.to_string(),
            next: self.next.clone(),
            prev: self.prev.clone(),
            end_next: self.end_next,
            end_prev: self.end_prev,
            sys_meta: self.sys_meta.as_deref().cloned(),
            descriptive: self
                .sys_meta
                .as_ref()
                .map(|m| m.fields.clone())
                .or_else(|| self.descriptive.clone()),
            errors: self.errors.clone(),
        }
    }
}

/// Durable representation; `ts` is the write time in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    #[serde(default)]
    pub next: Vec<String>,
    #[serde(default)]
    pub prev: Vec<String>,
    #[serde(default)]
    pub end_next: bool,
    #[serde(default)]
    pub end_prev: bool,
    pub sys_meta: Option<DescriptiveFields>,
    pub ts: i64,
}

/// Immutable copy of a record handed to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub pid: String,
    pub prev: Vec<String>,
    pub next: Vec<String>,
    pub end_prev: bool,
    pub end_next: bool,
    pub sys_meta: Option<SysMeta>,
    pub descriptive: Option<DescriptiveFields>,
    pub errors: Vec<ChainError>,
}

impl ChainSnapshot {
    pub fn is_unauthorized(&self) -> bool {
        self.errors.iter().any(ChainError::is_unauthorized)
    }
}

/// Immediate neighbors of a PID
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Adjacent {
    pub pid: String,
    pub prev: Option<String>,
    pub next: Option<String>,
}

/// Published after every record mutation
#[derive(Debug, Clone)]
pub enum ChainEvent {
    Updated { pid: String, snapshot: ChainSnapshot },
}

impl PidEvent for ChainEvent {
    fn pid(&self) -> &str {
        match self {
            ChainEvent::Updated { pid, .. } => pid,
        }
    }
}

/// Walk direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Toward newer revisions
    Forward,
    /// Toward older revisions
    Backward,
}

impl Direction {
    pub fn of_offset(offset: i64) -> Self {
        if offset >= 0 {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    pub(crate) fn list(self, rec: &VersionRecord) -> &Vec<String> {
        match self {
            Direction::Forward => &rec.next,
            Direction::Backward => &rec.prev,
        }
    }

    pub(crate) fn list_mut(self, rec: &mut VersionRecord) -> &mut Vec<String> {
        match self {
            Direction::Forward => &mut rec.next,
            Direction::Backward => &mut rec.prev,
        }
    }

    pub(crate) fn at_end(self, rec: &VersionRecord) -> bool {
        match self {
            Direction::Forward => rec.end_next,
            Direction::Backward => rec.end_prev,
        }
    }

    pub(crate) fn set_end(self, rec: &mut VersionRecord, value: bool) {
        match self {
            Direction::Forward => rec.end_next = value,
            Direction::Backward => rec.end_prev = value,
        }
    }

    /// The neighbor named by `meta` in this direction
    pub(crate) fn adjacent(self, meta: &SysMeta) -> Option<&str> {
        let pid = match self {
            Direction::Forward => meta.obsoleted_by.as_deref(),
            Direction::Backward => meta.obsoletes.as_deref(),
        };
        pid.filter(|p| !p.is_empty())
    }
}
