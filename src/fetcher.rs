use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use tokio_util::sync::CancellationToken;

use crate::data_models::CrawlResult;
use crate::error::FetchError;
use crate::extractor;

pub const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub max_content_size: usize,
    pub user_agent: String,
}

/// Fetches one page and turns it into a `CrawlResult`. Never returns an error:
/// every failure ends up in `CrawlResult::error`.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    max_content_size: usize,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> reqwest::Result<Fetcher> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(config.timeout)
            .build()?;
        Ok(Fetcher {
            client,
            max_content_size: config.max_content_size,
        })
    }

    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> CrawlResult {
        let start = Instant::now();
        if cancel.is_cancelled() {
            return CrawlResult::failure(url.to_string(), FetchError::Cancelled, start.elapsed());
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            res = self.fetch_page(url) => res,
        };

        match outcome {
            Ok((title, content)) => {
                log::debug!("fetched {url} in {:?}", start.elapsed());
                CrawlResult::success(url.to_string(), title, content, start.elapsed())
            }
            Err(e) => {
                log::debug!("error fetching page {url}, error: {e}");
                CrawlResult::failure(url.to_string(), e, start.elapsed())
            }
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<(String, String), FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let res = self
            .client
            .get(parsed)
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        if res.status() != StatusCode::OK {
            return Err(FetchError::Http {
                status: res.status().as_u16(),
            });
        }

        if let Some(content_type) = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_html_content_type(content_type) {
                return Err(FetchError::UnsupportedContentType(content_type.to_string()));
            }
        }

        let body = self.read_limited_body(res).await?;
        let (title, text) = extractor::extract(&body)?;
        Ok((title, text))
    }

    /// Reads at most `max_content_size` bytes no matter what content-length claims.
    async fn read_limited_body(&self, res: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        let max_bytes = self.max_content_size;
        let mut bytes = Vec::new();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Body(e.to_string()))?;
            if bytes.len().saturating_add(chunk.len()) > max_bytes {
                let can_take = max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                log::debug!("body exceeded {max_bytes} bytes, truncated");
                break;
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

/// Accepts HTML and XHTML, case-insensitively, ignoring parameters like charset.
pub fn is_html_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}
