//! Resource Map Verifier
//!
//! Confirms that a candidate resource map lists a document as a member.
//! Every membership fetch is bounded by a timeout; a fetch that fails or times
//! out is reported separately from a map that loads but lacks the document.

mod http;

pub use http::{parse_member_ids, HttpMemberService};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Members of a fetched resource map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberList {
    pub member_ids: Vec<String>,
    pub http_status: u16,
}

/// Remote source of resource map contents
#[async_trait]
pub trait MemberService: Send + Sync {
    async fn fetch_members(&self, rm: &str, timeout: Duration) -> Result<MemberList, FetchError>;
}

/// Outcome of verifying one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The map loaded and lists the document
    Valid { members: Vec<String> },
    /// The map loaded but does not list the document
    NotMember { members: Vec<String> },
    /// The map could not be loaded
    FetchFailed { status: Option<u16>, reason: String },
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid { .. })
    }

    /// Member list, when the map was fetched
    pub fn members(&self) -> Option<&[String]> {
        match self {
            Verification::Valid { members } | Verification::NotMember { members } => Some(members),
            Verification::FetchFailed { .. } => None,
        }
    }
}

pub struct Verifier {
    members: Arc<dyn MemberService>,
    timeout: Duration,
}

impl Verifier {
    pub fn new(members: Arc<dyn MemberService>, timeout: Duration) -> Self {
        Self { members, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check that `rm` lists `pid` as a member
    pub async fn verify(&self, rm: &str, pid: &str) -> Verification {
        let fetched = tokio::time::timeout(self.timeout, self.members.fetch_members(rm, self.timeout)).await;

        let list = match fetched {
            Ok(Ok(list)) => list,
            Ok(Err(err)) => {
                warn!(rm, error = %err, "resource map fetch failed");
                return Verification::FetchFailed {
                    status: err.status,
                    reason: err.message,
                };
            }
            Err(_) => {
                warn!(rm, timeout_ms = self.timeout.as_millis() as u64, "resource map fetch timed out");
                return Verification::FetchFailed {
                    status: None,
                    reason: format!("timed out after {:?}", self.timeout),
                };
            }
        };

        if list.http_status != 200 {
            return Verification::FetchFailed {
                status: Some(list.http_status),
                reason: format!("unexpected status {}", list.http_status),
            };
        }

        if list.member_ids.iter().any(|m| m == pid) {
            debug!(rm, pid, "resource map lists document");
            Verification::Valid { members: list.member_ids }
        } else {
            Verification::NotMember { members: list.member_ids }
        }
    }
}
