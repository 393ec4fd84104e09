use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use tokio_util::sync::CancellationToken;

use crate::data_models::{SearchResponse, SearchResult};
use crate::error::SearchError;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a SearXNG-compatible `/search?format=json` endpoint.
#[derive(Debug, Clone)]
pub struct SearchClient {
    base_url: String,
    client: reqwest::Client,
}

impl SearchClient {
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> reqwest::Result<SearchClient> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(SearchClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_search(&self) -> String {
        format!("{}/search", self.base_url)
    }

    /// Runs one query and returns at most `max_results` hits, best score first.
    pub async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SearchError::Cancelled),
            res = self.search_inner(query, max_results) => res,
        }
    }

    async fn search_inner(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
        let res = self
            .client
            .get(self.endpoint_search())
            .query(&[("q", query), ("format", "json")])
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(SearchError::Transport)?;

        let status = res.status();
        if status == StatusCode::FORBIDDEN {
            return Err(SearchError::ApiDisabled);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(SearchError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let body = res.bytes().await.map_err(SearchError::Transport)?;
        let parsed: SearchResponse = serde_json::from_slice(&body).map_err(SearchError::Parse)?;
        let results = rank(parsed.results, max_results);
        log::info!("search {query:?} returned {} results", results.len());
        Ok(results)
    }

    /// Cheap reachability probe. A failure here means "run without search",
    /// never "abort".
    pub async fn health_check(&self) -> Result<(), SearchError> {
        let res = self
            .client
            .get(self.endpoint_search())
            .query(&[("q", "test"), ("format", "json")])
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|source| SearchError::Unreachable {
                url: self.base_url.clone(),
                source,
            })?;

        let status = res.status();
        if status == StatusCode::FORBIDDEN {
            return Err(SearchError::ApiDisabled);
        }
        if status.is_server_error() {
            return Err(SearchError::Service {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(())
    }
}

/// Sorts by score, highest first, and keeps the top `max_results`.
pub fn rank(mut results: Vec<SearchResult>, max_results: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(max_results);
    results
}
