//! Fetches ORE resource maps through an object endpoint.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use super::{MemberList, MemberService};
use crate::auth::TokenProvider;
use crate::config::normalize_url;
use crate::error::FetchError;
use crate::sysmeta::unescape;

pub struct HttpMemberService {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpMemberService {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(format!("resmap-resolver/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: normalize_url(base_url),
            tokens,
        })
    }
}

#[async_trait]
impl MemberService for HttpMemberService {
    async fn fetch_members(&self, rm: &str, timeout: Duration) -> Result<MemberList, FetchError> {
        let url = format!("{}{}", self.base_url, urlencoding::encode(rm));
        let mut request = self.client.get(url).timeout(timeout);
        if let Some(token) = self.tokens.get_token().await {
            request = request.bearer_auth(token);
        }

        let res = request.send().await?;
        let status = res.status().as_u16();
        if !res.status().is_success() {
            return Err(FetchError::with_status(
                status,
                format!("Failed to fetch resource map: {status}"),
            ));
        }

        let body = res.text().await?;
        Ok(MemberList {
            member_ids: parse_member_ids(rm, &body),
            http_status: status,
        })
    }
}

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:[\w.-]+:)?identifier(?:\s[^>]*)?>([^<]*)</(?:[\w.-]+:)?identifier>")
        .expect("identifier element pattern")
});

/// Identifiers listed in an ORE RDF/XML document, excluding the map itself
pub fn parse_member_ids(rm: &str, xml: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in IDENTIFIER.captures_iter(xml) {
        let Some(m) = caps.get(1) else { continue };
        let id = unescape(m.as_str().trim());
        if !id.is_empty() && id != rm && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}
