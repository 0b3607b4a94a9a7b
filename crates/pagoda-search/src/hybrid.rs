//! Hybrid permissioned search engine.
//!
//! Vector k-NN plus lexical match with the owner/public/scope permission
//! filter and a rescoring pass; degrades to lexical-only when the embedding
//! service or the hybrid query fails. Results are enriched with human
//! filenames through one batched repository lookup.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use pagoda_core::{
    EffectiveTags, EmbeddingBackend, Error, FileRepository, Result, SearchResult, UserRepository,
};

use crate::es::EsClient;
use crate::query;

/// Hybrid search engine over the search store.
pub struct HybridSearchEngine {
    es: EsClient,
    embedder: Arc<dyn EmbeddingBackend>,
    tags: Arc<dyn EffectiveTags>,
    users: Arc<dyn UserRepository>,
    files: Arc<dyn FileRepository>,
}

/// Map a raw search response into ranked results.
pub fn map_hits(response: &Value) -> Vec<SearchResult> {
    response["hits"]["hits"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|hit| {
            let source = hit.get("_source")?;
            Some(SearchResult {
                file_md5: source["fileMd5"].as_str()?.to_string(),
                chunk_id: source["chunkId"].as_i64().unwrap_or(0) as i32,
                text_content: source["textContent"].as_str().unwrap_or_default().to_string(),
                score: hit["_score"].as_f64().unwrap_or(0.0),
                user_id: source["userId"].as_str().unwrap_or_default().to_string(),
                org_tag: source["orgTag"].as_str().unwrap_or_default().to_string(),
                is_public: source["public"].as_bool().unwrap_or(false),
                file_name: None,
            })
        })
        .collect()
}

impl HybridSearchEngine {
    pub fn new(
        es: EsClient,
        embedder: Arc<dyn EmbeddingBackend>,
        tags: Arc<dyn EffectiveTags>,
        users: Arc<dyn UserRepository>,
        files: Arc<dyn FileRepository>,
    ) -> Self {
        Self {
            es,
            embedder,
            tags,
            users,
            files,
        }
    }

    /// Resolve a caller reference (numeric id or username) to the stored
    /// user record.
    async fn resolve_user(&self, user_ref: &str) -> Result<pagoda_core::User> {
        let user = if let Ok(id) = user_ref.parse::<i64>() {
            self.users.find_by_id(id).await?
        } else {
            self.users.find_by_username(user_ref).await?
        };
        user.ok_or_else(|| Error::NotFound(format!("user '{user_ref}'")))
    }

    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        match self.embedder.embed_texts(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
            Ok(_) => {
                warn!(subsystem = "search", "Embedding service returned no vector for the query");
                None
            }
            Err(e) => {
                warn!(subsystem = "search", error = %e, "Query embedding failed; falling back to lexical search");
                None
            }
        }
    }

    /// Attach human filenames with one batched fingerprint lookup.
    async fn attach_file_names(&self, results: &mut [SearchResult]) {
        if results.is_empty() {
            return;
        }
        let mut md5s: Vec<String> = results.iter().map(|r| r.file_md5.clone()).collect();
        md5s.sort();
        md5s.dedup();

        match self.files.names_for_md5s(&md5s).await {
            Ok(names) => {
                for result in results.iter_mut() {
                    result.file_name = names.get(&result.file_md5).cloned();
                }
            }
            Err(e) => {
                warn!(subsystem = "search", error = %e, "Filename enrichment failed");
            }
        }
    }

    async fn lexical_with_permission(
        &self,
        query_text: &str,
        user_db_id: &str,
        effective_tags: &[String],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let filter = query::permission_filter(user_db_id, effective_tags);
        let body = query::lexical_request(query_text, top_k, filter);
        let response = self.es.search(&body).await?;
        let mut results = map_hits(&response);
        self.attach_file_names(&mut results).await;
        Ok(results)
    }

    /// Permissioned hybrid search entry point.
    #[instrument(skip(self), fields(subsystem = "search", op = "search_with_permission"))]
    pub async fn search_with_permission(
        &self,
        query_text: &str,
        user_ref: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let start = Instant::now();

        let user = self.resolve_user(user_ref).await?;
        let user_db_id = user.id.to_string();
        let effective_tags = self.tags.effective_tags(&user.username).await;
        debug!(user = %user.username, tag_count = effective_tags.len(), "Effective tags resolved");

        let Some(vector) = self.embed_query(query_text).await else {
            return self
                .lexical_with_permission(query_text, &user_db_id, &effective_tags, top_k)
                .await;
        };

        let filter = query::permission_filter(&user_db_id, &effective_tags);
        let body = query::hybrid_request(query_text, &vector, top_k, filter);

        let mut results = match self.es.search(&body).await {
            Ok(response) => map_hits(&response),
            Err(e) => {
                warn!(error = %e, "Hybrid query failed; retrying lexical-only");
                return self
                    .lexical_with_permission(query_text, &user_db_id, &effective_tags, top_k)
                    .await;
            }
        };

        self.attach_file_names(&mut results).await;
        info!(
            result_count = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Hybrid search complete"
        );
        Ok(results)
    }

    /// Unpermissioned search. Internal diagnostics only — never routed to
    /// end users.
    pub async fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        warn!(subsystem = "search", "Unpermissioned search invoked; this path is for diagnostics only");

        let body = match self.embed_query(query_text).await {
            Some(vector) => query::unfiltered_hybrid_request(query_text, &vector, top_k),
            None => query::unfiltered_lexical_request(query_text, top_k),
        };

        let response = self.es.search(&body).await?;
        Ok(map_hits(&response))
    }

    /// Remove a fingerprint's documents (cascade delete path).
    pub async fn delete_by_md5(&self, file_md5: &str) -> Result<()> {
        self.es.delete_by_md5(file_md5).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_hits_extracts_fields() {
        let response = json!({
            "hits": {
                "hits": [
                    {
                        "_score": 7.5,
                        "_source": {
                            "fileMd5": "d41d8cd98f00b204e9800998ecf8427e",
                            "chunkId": 3,
                            "textContent": "Alpha beta.",
                            "userId": "42",
                            "orgTag": "eng",
                            "public": false
                        }
                    }
                ]
            }
        });

        let results = map_hits(&response);
        assert_eq!(results.len(), 1);
        let hit = &results[0];
        assert_eq!(hit.file_md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hit.chunk_id, 3);
        assert_eq!(hit.text_content, "Alpha beta.");
        assert!((hit.score - 7.5).abs() < f64::EPSILON);
        assert_eq!(hit.org_tag, "eng");
        assert!(!hit.is_public);
        assert!(hit.file_name.is_none());
    }

    #[test]
    fn map_hits_tolerates_empty_response() {
        assert!(map_hits(&json!({})).is_empty());
        assert!(map_hits(&json!({"hits": {"hits": []}})).is_empty());
    }

    #[test]
    fn map_hits_skips_sourceless_hits() {
        let response = json!({
            "hits": { "hits": [ { "_score": 1.0 } ] }
        });
        assert!(map_hits(&response).is_empty());
    }
}
