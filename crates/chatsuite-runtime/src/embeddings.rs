//! Embedding client for upload chunks.

use async_trait::async_trait;
use chatsuite_core::config::EmbeddingsConfig;
use chatsuite_core::{Error, Result};
use serde::Deserialize;
use serde_json::json;

/// Turns texts into vectors, one per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    /// Build from config; `None` when no endpoint is configured.
    pub fn from_config(http: reqwest::Client, config: &EmbeddingsConfig) -> Option<Self> {
        let endpoint = config.endpoint.clone()?;
        let api_key = config.api_key();
        if api_key.is_none() {
            tracing::warn!("Embeddings endpoint configured without an API key; uploads will not be indexed");
            return None;
        }
        Some(Self {
            http,
            endpoint,
            model: config.model.clone(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&json!({"model": self.model, "input": inputs}));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Provider(format!("embeddings request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(crate::gateway::provider_error("embeddings", status, &body));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("embeddings decode failed: {e}")))?;
        order_embeddings(body.data, inputs.len())
    }
}

fn order_embeddings(mut items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if items.len() != expected {
        return Err(Error::Provider(format!(
            "embeddings returned {} vectors for {expected} inputs",
            items.len()
        )));
    }
    items.sort_by_key(|item| item.index);
    Ok(items.into_iter().map(|item| item.embedding).collect())
}
