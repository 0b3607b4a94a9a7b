//! Inference configuration.

use pagoda_core::defaults::{
    EMBED_DIMENSION, EMBED_TIMEOUT_SECS, GEN_MAX_TOKENS, GEN_TEMPERATURE, GEN_TOP_P,
};

/// Default OpenAI-compatible endpoint for embeddings and chat.
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";

/// Default embedding model tag recorded on every indexed passage.
pub const DEFAULT_EMBED_MODEL: &str = "deepseek-embed";

/// Default chat model.
pub const DEFAULT_CHAT_MODEL: &str = "deepseek-chat";

/// Configuration for the embedding client.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Requested output dimensionality; must match the search index mapping.
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_EMBED_MODEL.to_string(),
            dimension: EMBED_DIMENSION,
            timeout_secs: EMBED_TIMEOUT_SECS,
        }
    }
}

impl EmbeddingConfig {
    /// Read configuration from `EMBEDDING_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: std::env::var("EMBEDDING_API_KEY").ok(),
            model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string()),
            dimension: std::env::var("EMBEDDING_DIMENSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(EMBED_DIMENSION),
            timeout_secs: std::env::var("EMBEDDING_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(EMBED_TIMEOUT_SECS),
        }
    }
}

/// Prompt scaffolding for grounded chat.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// Deployment rules placed at the top of the system message.
    pub rules: String,
    /// Opening delimiter of the reference block.
    pub ref_start: String,
    /// Closing delimiter of the reference block.
    pub ref_end: String,
    /// Line used when retrieval produced nothing.
    pub no_result_text: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            rules: "Answer using the referenced passages when they are relevant. \
                    When the references do not cover the question, say so."
                .to_string(),
            ref_start: "<<REF>>".to_string(),
            ref_end: "<<END>>".to_string(),
            no_result_text: "(No references were retrieved this round)".to_string(),
        }
    }
}

/// Configuration for the streaming chat client.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub prompt: PromptConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: GEN_TEMPERATURE,
            top_p: GEN_TOP_P,
            max_tokens: GEN_MAX_TOKENS,
            prompt: PromptConfig::default(),
        }
    }
}

impl ChatConfig {
    /// Read configuration from `CHAT_*` environment variables.
    pub fn from_env() -> Self {
        let mut prompt = PromptConfig::default();
        if let Ok(rules) = std::env::var("CHAT_PROMPT_RULES") {
            prompt.rules = rules;
        }
        if let Ok(text) = std::env::var("CHAT_PROMPT_NO_RESULT") {
            prompt.no_result_text = text;
        }

        Self {
            base_url: std::env::var("CHAT_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: std::env::var("CHAT_API_KEY").ok(),
            model: std::env::var("CHAT_MODEL").unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string()),
            temperature: std::env::var("CHAT_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(GEN_TEMPERATURE),
            top_p: std::env::var("CHAT_TOP_P")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(GEN_TOP_P),
            max_tokens: std::env::var("CHAT_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(GEN_MAX_TOKENS),
            prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_constants() {
        let chat = ChatConfig::default();
        assert!((chat.temperature - 0.3).abs() < f64::EPSILON);
        assert!((chat.top_p - 0.9).abs() < f64::EPSILON);
        assert_eq!(chat.max_tokens, 2000);
        assert_eq!(chat.prompt.ref_start, "<<REF>>");
        assert_eq!(chat.prompt.ref_end, "<<END>>");
    }

    #[test]
    fn embedding_defaults() {
        let cfg = EmbeddingConfig::default();
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.dimension, pagoda_core::defaults::EMBED_DIMENSION);
    }
}
