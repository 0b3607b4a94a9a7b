//! Embedding client for OpenAI-compatible `/embeddings` endpoints.
//!
//! Batches are capped at 100 texts, each request runs under a 30 s
//! deadline, and HTTP-status failures are retried up to three times with a
//! fixed 1 s delay. Transport errors (connect, timeout) are not retried —
//! the ingest queue redelivers the whole task instead.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pagoda_core::defaults::{EMBED_BATCH_SIZE, EMBED_MAX_RETRIES, EMBED_RETRY_DELAY_SECS};
use pagoda_core::{EmbeddingBackend, Error, Result};

use crate::config::EmbeddingConfig;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimension: usize,
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// HTTP embedding client.
pub struct EmbeddingClient {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Embedding(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(EmbeddingConfig::from_env())
    }

    /// One POST for one batch, with the fixed-delay retry policy applied to
    /// HTTP-status errors only.
    async fn call_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/embeddings",
            self.config.base_url.trim_end_matches('/')
        );
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: batch,
            dimension: self.config.dimension,
            encoding_format: "float",
        };

        let mut attempt = 0u32;
        loop {
            let mut req = self.client.post(&url).json(&request);
            if let Some(ref key) = self.config.api_key {
                req = req.header("Authorization", format!("Bearer {key}"));
            }

            let response = req
                .send()
                .await
                .map_err(|e| Error::Embedding(format!("request failed: {e}")))?;

            if !response.status().is_success() {
                let status = response.status();
                attempt += 1;
                if attempt <= EMBED_MAX_RETRIES {
                    warn!(
                        subsystem = "inference",
                        op = "embed_texts",
                        attempt,
                        %status,
                        "Embedding call failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(EMBED_RETRY_DELAY_SECS)).await;
                    continue;
                }
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Embedding(format!(
                    "embedding service returned {status}: {body}"
                )));
            }

            let parsed: EmbeddingResponse = response
                .json()
                .await
                .map_err(|e| Error::Embedding(format!("failed to parse response: {e}")))?;

            let mut data = parsed.data;
            data.sort_by_key(|d| d.index);
            return Ok(data.into_iter().map(|d| d.embedding).collect());
        }
    }
}

#[async_trait]
impl EmbeddingBackend for EmbeddingClient {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(
            subsystem = "inference",
            op = "embed_texts",
            input_count = texts.len(),
            model = %self.config.model,
            "Embedding texts"
        );

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let vectors = self.call_once(batch).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "embedding service returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }
            all.extend(vectors);
        }

        debug!(
            subsystem = "inference",
            op = "embed_texts",
            result_count = all.len(),
            "Embeddings generated"
        );
        Ok(all)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let input = vec!["hello".to_string()];
        let req = EmbeddingRequest {
            model: "embed-v1",
            input: &input,
            dimension: 1024,
            encoding_format: "float",
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "embed-v1");
        assert_eq!(json["dimension"], 1024);
        assert_eq!(json["encoding_format"], "float");
        assert!(json["input"].is_array());
    }

    #[test]
    fn response_parsing_sorts_by_index() {
        let body = r#"{"data":[
            {"index":1,"embedding":[0.3,0.4]},
            {"index":0,"embedding":[0.1,0.2]}
        ]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        assert_eq!(data[0].embedding, vec![0.1, 0.2]);
        assert_eq!(data[1].embedding, vec![0.3, 0.4]);
    }
}
