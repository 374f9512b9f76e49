//! System Metadata
//!
//! Per-revision metadata records, the service seam used to fetch them, and
//! the deduplicating fetcher shared by the version tracker.

mod fetcher;
mod http;

pub use fetcher::SysMetaFetcher;
pub use http::{parse_sysmeta_xml, HttpSysMetaService};
pub(crate) use http::unescape;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Revision metadata for one PID
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SysMeta {
    pub identifier: String,
    pub series_id: Option<String>,
    /// The previous revision, if any
    pub obsoletes: Option<String>,
    /// The next revision, if any
    pub obsoleted_by: Option<String>,
    pub submitter: Option<String>,
    pub archived: Option<bool>,
    #[serde(flatten)]
    pub fields: DescriptiveFields,
}

impl SysMeta {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    pub fn with_obsoletes(mut self, pid: impl Into<String>) -> Self {
        self.obsoletes = Some(pid.into());
        self
    }

    pub fn with_obsoleted_by(mut self, pid: impl Into<String>) -> Self {
        self.obsoleted_by = Some(pid.into());
        self
    }
}

/// The whitelist of descriptive fields written to the durable cache.
///
/// Links and access-related fields are deliberately absent: they go stale
/// and are re-read from the service instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptiveFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rights_holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_uploaded: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_sys_metadata_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl DescriptiveFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Remote source of revision metadata
#[async_trait]
pub trait SysMetaService: Send + Sync {
    /// Fetch metadata for `pid`. Series identifiers resolve to the metadata
    /// of their current revision.
    async fn fetch(&self, pid: &str, token: Option<&str>) -> Result<SysMeta, FetchError>;
}
