//! Status vocabulary, events and results of the resolver.

use serde::Serialize;

use crate::events::{EventMeta, Level, LogEvent, PidEvent};

/// Which step of a resolution produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Index,
    Storage,
    Sysmeta,
    Guess,
    Series,
    Resolve,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Index => "index",
            Strategy::Storage => "storage",
            Strategy::Sysmeta => "sysmeta",
            Strategy::Guess => "guess",
            Strategy::Series => "series",
            Strategy::Resolve => "resolve",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    IndexMatch,
    MultiRmMatch,
    StorageMatch,
    SysmetaMatch,
    GuessMatch,
    IndexMiss,
    StorageMiss,
    SysmetaMiss,
    GuessMiss,
    MultiRmMiss,
    PidIsSeriesId,
    NoPidForSeriesId,
    AllMiss,
    FoundButNotValid,
    FoundAndValid,
    RmFetchError,
    Unauthorized,
}

impl Status {
    pub fn message(&self) -> &'static str {
        match self {
            Status::IndexMatch => "Resource map pid found in index",
            Status::MultiRmMatch => {
                "Multiple versions of resource map found in index and could resolve to the most recent"
            }
            Status::StorageMatch => "Resource map pid found in local storage",
            Status::SysmetaMatch => "Resource map pid found by walking sysmeta",
            Status::GuessMatch => "Resource map pid guessed based on naming convention",
            Status::IndexMiss => "Resource map pid not found in index",
            Status::StorageMiss => "Resource map pid not found in local storage",
            Status::SysmetaMiss => "Resource map pid not found by walking sysmeta",
            Status::GuessMiss => "Resource map pid not found by guessing",
            Status::MultiRmMiss => {
                "Multiple resource maps found in index, but could not resolve to a single RM. \
                 They are either not versions of each other and/or are all obsoleted."
            }
            Status::PidIsSeriesId => "PID is a series ID, not an object PID",
            Status::NoPidForSeriesId => "PID not found for series ID",
            Status::AllMiss => "Resource map pid not found by any strategy",
            Status::FoundButNotValid => "Resource map pid found but does not link to the given PID",
            Status::FoundAndValid => "Resource map pid found and links to the given PID",
            Status::RmFetchError => "Error fetching resource map via object API",
            Status::Unauthorized => "Stopped resolution: user not authorized to access sysmeta",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Status::IndexMatch
                | Status::MultiRmMatch
                | Status::StorageMatch
                | Status::SysmetaMatch
                | Status::GuessMatch
                | Status::FoundAndValid
        )
    }

    pub fn level(&self) -> Level {
        match self {
            Status::RmFetchError
            | Status::FoundButNotValid
            | Status::Unauthorized
            | Status::NoPidForSeriesId
            | Status::AllMiss => Level::Warning,
            _ => Level::Info,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Published for every status update
#[derive(Debug, Clone, Serialize)]
pub struct ResolverEvent {
    pub pid: String,
    pub rm: Option<String>,
    pub status: Status,
    pub strategy: Strategy,
    pub meta: EventMeta,
}

impl PidEvent for ResolverEvent {
    fn pid(&self) -> &str {
        &self.pid
    }
}

/// Outcome of one `resolve` call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub success: bool,
    pub pid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rm: Option<String>,
    /// The chain walk stopped on a 401/403
    pub unauthorized: bool,
    /// The index listed several resource maps that could not be reconciled
    pub multiple_rms: bool,
    /// Entries logged for `pid` during this call
    pub log: Vec<LogEvent>,
}

impl ResolutionResult {
    /// Strategy of the first successful entry in the log
    pub fn first_success(&self) -> Option<&str> {
        self.log.iter().find(|e| e.success).map(|e| e.strategy.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_statuses() {
        assert!(Status::GuessMatch.is_success());
        assert!(Status::FoundAndValid.is_success());
        assert!(!Status::FoundButNotValid.is_success());
        assert!(!Status::AllMiss.is_success());
    }

    #[test]
    fn test_status_serializes_as_name() {
        let value = serde_json::to_value(Status::MultiRmMiss).unwrap();
        assert_eq!(value, serde_json::json!("multiRmMiss"));
        assert_eq!(Strategy::Sysmeta.to_string(), "sysmeta");
    }
}
