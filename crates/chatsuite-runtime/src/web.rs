//! Web search and page reader clients used by the browsing tool.

use std::time::Duration;

use async_trait::async_trait;
use chatsuite_core::config::WebConfig;
use chatsuite_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

/// Search and scraping backend.
#[async_trait]
pub trait WebResearch: Send + Sync {
    /// Up to `limit` organic results for a query.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Readable text of a page.
    async fn read(&self, url: &str) -> Result<String>;
}

/// Serper search plus Jina reader over HTTP.
pub struct HttpWebResearch {
    http: reqwest::Client,
    search_endpoint: String,
    search_key: Option<String>,
    reader_endpoint: String,
    reader_key: Option<String>,
    timeout: Duration,
}

impl HttpWebResearch {
    pub fn new(http: reqwest::Client, config: &WebConfig) -> Self {
        Self {
            http,
            search_endpoint: config.search_endpoint.clone(),
            search_key: config.search_api_key(),
            reader_endpoint: config.reader_endpoint.trim_end_matches('/').to_string(),
            reader_key: config.reader_api_key(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
}

#[derive(Debug, Deserialize)]
struct SerperResult {
    #[serde(default)]
    title: String,
    link: String,
}

#[async_trait]
impl WebResearch for HttpWebResearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let key = self
            .search_key
            .as_deref()
            .ok_or_else(|| Error::Config("web search API key is not configured".to_string()))?;

        let response = self
            .http
            .post(&self.search_endpoint)
            .header("X-API-KEY", key)
            .timeout(self.timeout)
            .json(&json!({"q": query, "num": limit}))
            .send()
            .await
            .map_err(|e| Error::Provider(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Provider(format!("search returned {status}")));
        }

        let body: SerperResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("search response decode failed: {e}")))?;

        Ok(body
            .organic
            .into_iter()
            .take(limit)
            .map(|result| SearchHit {
                title: result.title,
                url: result.link,
            })
            .collect())
    }

    async fn read(&self, url: &str) -> Result<String> {
        let mut request = self
            .http
            .get(format!("{}/{url}", self.reader_endpoint))
            .header("Accept", "text/plain")
            .timeout(self.timeout);
        if let Some(key) = &self.reader_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Provider(format!("reader request failed for {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Provider(format!("reader returned {status} for {url}")));
        }

        response
            .text()
            .await
            .map_err(|e| Error::Provider(format!("reader body failed for {url}: {e}")))
    }
}
