//! # pagoda-inference
//!
//! Embedding and streaming chat clients for the pagoda knowledge hub,
//! speaking the OpenAI-compatible wire shape (`/embeddings`,
//! `/chat/completions` with SSE streaming).

pub mod chat;
pub mod config;
pub mod embedding;
pub mod mock;

pub use chat::{build_system_message, parse_sse_stream, ChatClient};
pub use config::{ChatConfig, EmbeddingConfig, PromptConfig};
pub use embedding::EmbeddingClient;
pub use mock::{MockChat, MockEmbedding};
