//! Search Index
//!
//! Typed view of the documents returned by the search index. Documents are
//! decoded once at the client boundary so the resolver never inspects raw
//! fields.

mod solr;

pub use solr::SolrIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Format type of data objects
pub const DATA_FORMAT_TYPE: &str = "DATA";
/// Format id carried by resource maps (OAI-ORE)
pub const RESOURCE_MAP_FORMAT_ID: &str = "http://www.openarchives.org/ore/terms";

/// Index fields the resolver reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexField {
    Id,
    SeriesId,
    ResourceMap,
    FormatId,
    FormatType,
}

impl IndexField {
    pub fn name(&self) -> &'static str {
        match self {
            IndexField::Id => "id",
            IndexField::SeriesId => "seriesId",
            IndexField::ResourceMap => "resourceMap",
            IndexField::FormatId => "formatId",
            IndexField::FormatType => "formatType",
        }
    }

    /// Everything the resolver needs to classify a document
    pub fn resolution_set() -> &'static [IndexField] {
        &[
            IndexField::ResourceMap,
            IndexField::FormatId,
            IndexField::FormatType,
            IndexField::SeriesId,
            IndexField::Id,
        ]
    }
}

/// Filters understood by the index client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    /// Documents whose id or series id equals the value
    IdOrSeriesId(String),
}

impl IndexQuery {
    /// Render as a Solr `q` parameter
    pub fn to_solr(&self) -> String {
        match self {
            IndexQuery::IdOrSeriesId(pid) => {
                let pid = escape_phrase(pid);
                format!(r#"id:"{pid}" OR seriesId:"{pid}""#)
            }
        }
    }
}

fn escape_phrase(value: &str) -> String {
    value.replace('\\', r"\\").replace('"', "\\\"")
}

/// One document from the index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDoc {
    pub id: Option<String>,
    pub series_id: Option<String>,
    #[serde(default)]
    pub resource_map: Vec<String>,
    pub format_id: Option<String>,
    pub format_type: Option<String>,
}

impl IndexDoc {
    pub fn is_data(&self) -> bool {
        self.format_type.as_deref() == Some(DATA_FORMAT_TYPE)
    }

    pub fn is_resource_map(&self) -> bool {
        self.format_id.as_deref() == Some(RESOURCE_MAP_FORMAT_ID)
    }
}

/// Remote search service
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn query(&self, filter: &IndexQuery, fields: &[IndexField]) -> Result<Vec<IndexDoc>, FetchError>;
}
