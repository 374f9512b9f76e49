//! Solr-backed index client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{IndexDoc, IndexField, IndexQuery, SearchIndex};
use crate::auth::TokenProvider;
use crate::config::normalize_url;
use crate::error::FetchError;

const MAX_ROWS: usize = 1000;

pub struct SolrIndex {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl SolrIndex {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(format!("resmap-resolver/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: normalize_url(base_url),
            tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SolrResponse {
    response: SolrBody,
}

#[derive(Debug, Deserialize)]
struct SolrBody {
    #[serde(default)]
    docs: Vec<IndexDoc>,
}

#[async_trait]
impl SearchIndex for SolrIndex {
    async fn query(&self, filter: &IndexQuery, fields: &[IndexField]) -> Result<Vec<IndexDoc>, FetchError> {
        let fl = fields.iter().map(|f| f.name()).collect::<Vec<_>>().join(",");
        let rows = MAX_ROWS.to_string();
        let mut request = self.client.get(&self.base_url).query(&[
            ("q", filter.to_solr().as_str()),
            ("fl", fl.as_str()),
            ("rows", rows.as_str()),
            ("wt", "json"),
        ]);
        if let Some(token) = self.tokens.get_token().await {
            request = request.bearer_auth(token);
        }

        let res = request.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::with_status(
                status.as_u16(),
                format!("index query failed: {}", status.as_u16()),
            ));
        }

        let body: SolrResponse = res.json().await?;
        Ok(body.response.docs)
    }
}
