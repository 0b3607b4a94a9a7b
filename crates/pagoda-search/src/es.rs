//! Elasticsearch REST client.
//!
//! A thin JSON client over `reqwest`: index bootstrap, NDJSON bulk
//! indexing with per-item error surfacing, delete-by-query, and raw
//! search execution. Query bodies come from [`crate::query`].

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use pagoda_core::defaults::SEARCH_INDEX;
use pagoda_core::{Error, Result, SearchDocument};

/// Search store configuration.
#[derive(Debug, Clone)]
pub struct EsConfig {
    pub base_url: String,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl EsConfig {
    /// Read configuration from `ELASTICSEARCH_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ELASTICSEARCH_URL")
                .unwrap_or_else(|_| "http://localhost:9200".to_string()),
            index: std::env::var("ELASTICSEARCH_INDEX")
                .unwrap_or_else(|_| SEARCH_INDEX.to_string()),
            username: std::env::var("ELASTICSEARCH_USERNAME").ok(),
            password: std::env::var("ELASTICSEARCH_PASSWORD").ok(),
        }
    }
}

/// Minimal Elasticsearch HTTP client.
#[derive(Clone)]
pub struct EsClient {
    client: reqwest::Client,
    config: EsConfig,
}

impl EsClient {
    pub fn new(config: EsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Search(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(EsConfig::from_env())
    }

    pub fn index(&self) -> &str {
        &self.config.index
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.config.base_url.trim_end_matches('/'));
        let mut req = self.client.request(method, &url);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    /// Create the index with the expected mapping if it does not exist.
    pub async fn ensure_index(&self, dimension: usize) -> Result<()> {
        let path = format!("/{}", self.config.index);
        let head = self
            .request(reqwest::Method::HEAD, &path)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        if head.status().is_success() {
            debug!(index = %self.config.index, "Search index present");
            return Ok(());
        }

        let response = self
            .request(reqwest::Method::PUT, &path)
            .json(&crate::query::index_mapping(dimension))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!(
                "index creation failed with HTTP {status}: {body}"
            )));
        }

        info!(index = %self.config.index, dimension, "Search index created");
        Ok(())
    }

    /// Bulk-index documents in one request. Any per-item error surfaces as
    /// an [`Error::Index`] so the ingest task can be retried; deterministic
    /// ids make that retry overwrite instead of duplicate.
    pub async fn bulk_index(&self, documents: &[SearchDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for doc in documents {
            body.push_str(&serde_json::to_string(&json!({
                "index": { "_index": self.config.index, "_id": doc.id }
            }))?);
            body.push('\n');
            body.push_str(&serde_json::to_string(doc)?);
            body.push('\n');
        }

        let response = self
            .request(reqwest::Method::POST, "/_bulk")
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Search(format!("bulk request failed with HTTP {status}")));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| Error::Search(format!("failed to parse bulk response: {e}")))?;

        if result["errors"].as_bool().unwrap_or(false) {
            let first_error = result["items"]
                .as_array()
                .into_iter()
                .flatten()
                .find_map(|item| item["index"]["error"].as_object().cloned());
            warn!(
                subsystem = "search",
                op = "bulk_index",
                doc_count = documents.len(),
                "Bulk indexing reported item errors"
            );
            return Err(Error::Index(format!(
                "bulk indexing reported item errors: {:?}",
                first_error
            )));
        }

        debug!(
            subsystem = "search",
            op = "bulk_index",
            doc_count = documents.len(),
            "Bulk indexing complete"
        );
        Ok(())
    }

    /// Remove every document of a fingerprint (cascade delete path).
    pub async fn delete_by_md5(&self, file_md5: &str) -> Result<()> {
        let path = format!("/{}/_delete_by_query", self.config.index);
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({ "query": { "term": { "fileMd5": file_md5 } } }))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Search(format!(
                "delete_by_query failed with HTTP {status}"
            )));
        }
        Ok(())
    }

    /// Execute a search body and return the raw response.
    pub async fn search(&self, body: &Value) -> Result<Value> {
        let path = format!("/{}/_search", self.config.index);
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!(
                "search failed with HTTP {status}: {body}"
            )));
        }

        Ok(response
            .json()
            .await
            .map_err(|e| Error::Search(format!("failed to parse search response: {e}")))?)
    }
}
