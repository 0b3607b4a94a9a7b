//! Per-task ingestion pipeline: parse, split, persist, embed, index.

use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use pagoda_core::defaults::{EMBED_BATCH_SIZE, PARENT_CHUNK_CHARS, PASSAGE_TARGET_CHARS};
use pagoda_core::{
    EmbeddingBackend, Error, IngestTask, PassageRepository, Result, SearchDocument,
};
use pagoda_search::EsClient;

use crate::extract::extract_text;
use crate::memory::MemoryGate;
use crate::splitter::TwoLevelSplitter;

/// Deterministic search-document id: retried ingestion overwrites the same
/// documents instead of duplicating them.
pub fn search_doc_id(file_md5: &str, chunk_id: i32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_md5.as_bytes());
    hasher.update(b":");
    hasher.update(chunk_id.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Splitting knobs, configurable per deployment.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Parent buffer size in characters.
    pub parent_chunk_chars: usize,
    /// Target passage size in characters.
    pub passage_target_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            parent_chunk_chars: PARENT_CHUNK_CHARS,
            passage_target_chars: PASSAGE_TARGET_CHARS,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            parent_chunk_chars: std::env::var("PARSE_PARENT_CHUNK_CHARS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.parent_chunk_chars),
            passage_target_chars: std::env::var("PARSE_PASSAGE_TARGET_CHARS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.passage_target_chars),
        }
    }
}

/// Handler owning the full post-merge pipeline for one task.
pub struct IngestHandler {
    passages: Arc<dyn PassageRepository>,
    embedder: Arc<dyn EmbeddingBackend>,
    es: EsClient,
    memory: MemoryGate,
    config: IngestConfig,
}

impl IngestHandler {
    pub fn new(
        passages: Arc<dyn PassageRepository>,
        embedder: Arc<dyn EmbeddingBackend>,
        es: EsClient,
        memory: MemoryGate,
        config: IngestConfig,
    ) -> Self {
        Self {
            passages,
            embedder,
            es,
            memory,
            config,
        }
    }

    /// Process one claimed task end to end. Any error propagates to the
    /// queue, which redelivers until the retry budget runs out.
    #[instrument(skip(self, task), fields(subsystem = "jobs", task_id = task.id, file_md5 = %task.payload.file_md5))]
    pub async fn process(&self, task: &IngestTask) -> Result<()> {
        let start = Instant::now();
        let payload = &task.payload;

        self.memory.check().await?;

        // Parse and split. The splitter emits passages synchronously into a
        // buffer; rows are written afterwards so the extractor never blocks
        // on the database.
        let mut texts: Vec<String> = Vec::new();
        {
            let mut splitter = TwoLevelSplitter::new(
                self.config.parent_chunk_chars,
                self.config.passage_target_chars,
                |passage| texts.push(passage),
            );
            extract_text(&payload.file_path, &payload.file_name, |chars| {
                splitter.on_chars(chars)
            })
            .await?;
            splitter.on_end();
        }

        info!(passage_count = texts.len(), "Document parsed and split");

        for (i, text) in texts.iter().enumerate() {
            let chunk_id = i as i32 + 1;
            self.passages
                .insert(
                    &payload.file_md5,
                    chunk_id,
                    text,
                    &payload.user_id,
                    &payload.org_tag,
                    payload.is_public,
                )
                .await?;
        }

        // Embed and index from the persisted rows, so a retry after a
        // partial parse still indexes exactly what was stored.
        self.vectorize(&payload.file_md5).await?;

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "Ingestion complete"
        );
        Ok(())
    }

    /// Embed all passages of a fingerprint and bulk-index them.
    pub async fn vectorize(&self, file_md5: &str) -> Result<()> {
        let passages = self.passages.list_by_md5(file_md5).await?;
        if passages.is_empty() {
            warn!(file_md5 = %file_md5, "No passages to vectorize");
            return Ok(());
        }

        let mut documents = Vec::with_capacity(passages.len());
        for batch in passages.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|p| p.text_content.clone()).collect();
            let vectors = self.embedder.embed_texts(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            for (passage, vector) in batch.iter().zip(vectors) {
                documents.push(SearchDocument {
                    id: search_doc_id(&passage.file_md5, passage.chunk_id),
                    file_md5: passage.file_md5.clone(),
                    chunk_id: passage.chunk_id,
                    text_content: passage.text_content.clone(),
                    vector,
                    model_version: self.embedder.model_name().to_string(),
                    user_id: passage.user_id.clone(),
                    org_tag: passage.org_tag.clone(),
                    public: passage.is_public,
                });
            }
        }

        self.es.bulk_index(&documents).await?;
        info!(
            file_md5 = %file_md5,
            passage_count = documents.len(),
            "Passages embedded and indexed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_ids_are_deterministic() {
        let a = search_doc_id("d41d8cd98f00b204e9800998ecf8427e", 1);
        let b = search_doc_id("d41d8cd98f00b204e9800998ecf8427e", 1);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn doc_ids_differ_per_chunk_and_file() {
        let md5_a = "d41d8cd98f00b204e9800998ecf8427e";
        let md5_b = "900150983cd24fb0d6963f7d28e17f72";
        assert_ne!(search_doc_id(md5_a, 1), search_doc_id(md5_a, 2));
        assert_ne!(search_doc_id(md5_a, 1), search_doc_id(md5_b, 1));
    }

    #[test]
    fn doc_id_separator_prevents_collisions() {
        // (md5 ending in "1", chunk 2) vs (md5, chunk 12) must not collide.
        assert_ne!(search_doc_id("abc1", 2), search_doc_id("abc", 12));
    }

    #[test]
    fn ingest_config_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.parent_chunk_chars, 1024 * 1024);
        assert_eq!(config.passage_target_chars, 1000);
    }
}
