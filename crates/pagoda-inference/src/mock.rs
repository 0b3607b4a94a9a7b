//! Scripted inference backends for tests.

use async_trait::async_trait;
use futures::stream;

use pagoda_core::{ChatMessage, EmbeddingBackend, Error, Result, StreamingChat, TokenStream};

/// Deterministic embedding backend: each text maps to a fixed-dimension
/// vector derived from its bytes, so equal texts embed equally.
pub struct MockEmbedding {
    pub dimension: usize,
    /// When set, every call fails — for exercising the lexical fallback.
    pub fail: bool,
}

impl MockEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            dimension: 4,
            fail: true,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbedding {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            return Err(Error::Embedding("mock embedding failure".to_string()));
        }
        Ok(texts
            .iter()
            .map(|t| {
                (0..self.dimension)
                    .map(|i| {
                        let byte = t.as_bytes().get(i % t.len().max(1)).copied().unwrap_or(0);
                        byte as f32 / 255.0
                    })
                    .collect()
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

/// Chat backend that replays a scripted list of deltas.
pub struct MockChat {
    pub deltas: Vec<String>,
    pub fail: bool,
}

impl MockChat {
    pub fn new(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|s| s.to_string()).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            deltas: vec![],
            fail: true,
        }
    }
}

#[async_trait]
impl StreamingChat for MockChat {
    async fn stream_chat(
        &self,
        _user_message: &str,
        _context: &str,
        _history: &[ChatMessage],
    ) -> Result<TokenStream> {
        if self.fail {
            return Err(Error::Inference("mock chat failure".to_string()));
        }
        let items: Vec<Result<String>> = self.deltas.iter().cloned().map(Ok).collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn mock_embedding_is_deterministic() {
        let backend = MockEmbedding::new(4);
        let a = backend.embed_texts(&["hello".to_string()]).await.unwrap();
        let b = backend.embed_texts(&["hello".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 4);
    }

    #[tokio::test]
    async fn mock_chat_replays_deltas() {
        let backend = MockChat::new(&["Hel", "lo."]);
        let mut stream = backend.stream_chat("Hi", "", &[]).await.unwrap();
        let mut out = String::new();
        while let Some(delta) = stream.next().await {
            out.push_str(&delta.unwrap());
        }
        assert_eq!(out, "Hello.");
    }
}
