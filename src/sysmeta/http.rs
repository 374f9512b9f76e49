//! HTTP client for a DataONE-style `meta` endpoint returning sysmeta XML.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;

use super::{DescriptiveFields, SysMeta, SysMetaService};
use crate::config::normalize_url;
use crate::error::FetchError;

pub struct HttpSysMetaService {
    client: Client,
    base_url: String,
}

impl HttpSysMetaService {
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(format!("resmap-resolver/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: normalize_url(base_url),
        }
    }

    fn url(&self, pid: &str) -> String {
        format!("{}{}", self.base_url, urlencoding::encode(pid))
    }
}

#[async_trait]
impl SysMetaService for HttpSysMetaService {
    async fn fetch(&self, pid: &str, token: Option<&str>) -> Result<SysMeta, FetchError> {
        let mut request = self.client.get(self.url(pid));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let res = request.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::with_status(
                status.as_u16(),
                format!("Failed to fetch SysMeta: {}", status.as_u16()),
            ));
        }

        let text = res.text().await?;
        Ok(parse_sysmeta_xml(pid, &text))
    }
}

/// Leaf element with optional namespace prefix: name, attributes, text, closing name
static LEAF_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:[\w.-]+:)?([\w.-]+)(\s[^>]*)?>([^<]*)</(?:[\w.-]+:)?([\w.-]+)>")
        .expect("leaf element pattern")
});

static ALGORITHM_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"algorithm\s*=\s*"([^"]*)""#).expect("algorithm attribute pattern"));

struct Leaf<'a> {
    attrs: &'a str,
    text: String,
}

/// Parse the fields we consume out of a sysmeta XML document.
///
/// Missing elements stay `None`; an absent `identifier` falls back to the
/// PID that was requested.
pub fn parse_sysmeta_xml(pid: &str, xml: &str) -> SysMeta {
    let leaves = leaf_elements(xml);
    let text = |tag: &str| leaves.get(tag).map(|leaf| leaf.text.clone()).filter(|v| !v.is_empty());
    let date = |tag: &str| {
        text(tag)
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|d| d.with_timezone(&Utc))
    };
    let checksum_algorithm = leaves
        .get("checksum")
        .and_then(|leaf| ALGORITHM_ATTR.captures(leaf.attrs))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    SysMeta {
        identifier: text("identifier").unwrap_or_else(|| pid.to_string()),
        series_id: text("seriesId"),
        obsoletes: text("obsoletes"),
        obsoleted_by: text("obsoletedBy"),
        submitter: text("submitter"),
        archived: text("archived").map(|v| v.eq_ignore_ascii_case("true")),
        fields: DescriptiveFields {
            format_id: text("formatId"),
            size: text("size").and_then(|v| v.parse().ok()),
            checksum: text("checksum"),
            checksum_algorithm,
            rights_holder: text("rightsHolder"),
            date_uploaded: date("dateUploaded"),
            date_sys_metadata_modified: date("dateSysMetadataModified"),
            file_name: text("fileName"),
        },
    }
}

/// First occurrence of every leaf element, keyed by local name
fn leaf_elements(xml: &str) -> HashMap<&str, Leaf<'_>> {
    let mut leaves = HashMap::new();
    for caps in LEAF_ELEMENT.captures_iter(xml) {
        let (Some(open), Some(close), Some(text)) = (caps.get(1), caps.get(4), caps.get(3)) else {
            continue;
        };
        if open.as_str() != close.as_str() {
            continue;
        }
        leaves.entry(open.as_str()).or_insert_with(|| Leaf {
            attrs: caps.get(2).map_or("", |m| m.as_str()),
            text: unescape(text.as_str().trim()),
        });
    }
    leaves
}

pub(crate) fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
