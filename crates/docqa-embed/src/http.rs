//! OpenAI-compatible `/embeddings` client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use docqa_core::config::EmbeddingConfig;
use docqa_core::error::{Error, Result};
use docqa_core::retry::RetryPolicy;
use docqa_core::traits::{Embedder, Embeddings};
use docqa_core::types::TokenUsage;

pub struct HttpEmbedder {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
    batch_size: usize,
    retry: RetryPolicy,
    id: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingUsage {
    #[serde(default)]
    prompt_tokens: u64,
}

impl HttpEmbedder {
    pub fn from_config(cfg: &EmbeddingConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        let api_key = std::env::var(&cfg.api_key_env).ok().filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %cfg.api_key_env, "embedding API key not set; sending unauthenticated requests");
        }
        Ok(Self {
            client,
            url: format!("{}/embeddings", cfg.base_url.trim_end_matches('/')),
            model: cfg.model.clone(),
            api_key,
            dim: cfg.dim,
            batch_size: cfg.batch_size.max(1),
            retry,
            id: format!("http:{}:d{}", cfg.model, cfg.dim),
        })
    }

    async fn request_batch(&self, batch: &[String], attempt: u32) -> Result<(Vec<Vec<f32>>, u64)> {
        // Blank inputs are rejected by most providers.
        let input: Vec<&str> = batch.iter().map(|t| if t.trim().is_empty() { " " } else { t.as_str() }).collect();
        let mut req = self.client.post(&self.url).json(&json!({ "model": self.model, "input": input }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        tracing::debug!(url = %self.url, size = batch.len(), attempt, "embedding request");

        let response = req.send().await.map_err(|e| {
            Error::retrieval(format!("embedding request failed: {e}"), e.is_timeout() || e.is_connect() || e.is_request())
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::retrieval(format!("failed to read embedding response: {e}"), true))?;
        if !status.is_success() {
            return Err(map_http_error(status, &body));
        }
        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| Error::retrieval(format!("malformed embedding response: {e}"), false))?;
        let tokens = parsed.usage.map_or(0, |u| u.prompt_tokens);
        let vectors = self.order_and_check(parsed.data, batch.len())?;
        Ok((vectors, tokens))
    }

    fn order_and_check(&self, mut data: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>> {
        if data.len() != expected {
            return Err(Error::retrieval(
                format!("embedding service returned {} vectors for {} inputs", data.len(), expected),
                false,
            ));
        }
        data.sort_by_key(|item| item.index);
        let mut out = Vec::with_capacity(expected);
        for (pos, item) in data.into_iter().enumerate() {
            if item.index != pos {
                return Err(Error::retrieval(format!("embedding response missing index {pos}"), false));
            }
            if item.embedding.len() != self.dim {
                return Err(Error::DimensionMismatch { expected: self.dim, actual: item.embedding.len() });
            }
            out.push(item.embedding);
        }
        Ok(out)
    }
}

fn map_http_error(status: StatusCode, body: &str) -> Error {
    let transient = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    let snippet: String = body.chars().take(200).collect();
    Error::retrieval(format!("embedding service returned {status}: {snippet}"), transient)
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn embedder_id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    async fn embed(&self, texts: &[String], cancel: &CancellationToken) -> Result<Embeddings> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut tokens = 0u64;
        for batch in texts.chunks(self.batch_size) {
            let (vecs, used) = self
                .retry
                .run("embeddings", cancel, |attempt| self.request_batch(batch, attempt))
                .await?;
            vectors.extend(vecs);
            tokens += used;
        }
        Ok(Embeddings { vectors, usage: TokenUsage::new(tokens, 0) })
    }
}
