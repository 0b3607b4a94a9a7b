//! Streaming chat client for OpenAI-compatible `/chat/completions`
//! endpoints.
//!
//! The system message is composed from the deployment rules plus a
//! delimited reference block; prior history and the user message follow.
//! The SSE response is parsed into a stream of content deltas.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use pagoda_core::{ChatMessage, Error, MessageRole, Result, StreamingChat, TokenStream};

use crate::config::{ChatConfig, PromptConfig};

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// Compose the system message: rules, then the reference block (or the
/// configured no-references line when retrieval came back empty).
pub fn build_system_message(prompt: &PromptConfig, context: &str) -> String {
    let mut sys = String::new();
    if !prompt.rules.is_empty() {
        sys.push_str(&prompt.rules);
        sys.push_str("\n\n");
    }
    sys.push_str(&prompt.ref_start);
    sys.push('\n');
    if context.is_empty() {
        sys.push_str(&prompt.no_result_text);
        sys.push('\n');
    } else {
        sys.push_str(context);
    }
    sys.push_str(&prompt.ref_end);
    sys
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

/// Parse one SSE chunk into accumulated content, `None` at `[DONE]` or when
/// the chunk carries no content.
fn parse_sse_chunk(chunk: &str) -> Option<Result<String>> {
    let mut content = String::new();

    for line in chunk.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if line == "data: [DONE]" {
            return None;
        }
        if let Some(data) = line.strip_prefix("data: ") {
            match serde_json::from_str::<ChatCompletionChunk>(data) {
                Ok(chunk) => {
                    for choice in chunk.choices {
                        if let Some(c) = choice.delta.content {
                            content.push_str(&c);
                        }
                    }
                }
                Err(e) => {
                    return Some(Err(Error::Inference(format!(
                        "failed to parse SSE chunk: {e}"
                    ))));
                }
            }
        }
    }

    if content.is_empty() {
        None
    } else {
        Some(Ok(content))
    }
}

/// Turn a byte stream of SSE frames into a stream of content deltas.
pub fn parse_sse_stream(
    stream: impl Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> TokenStream {
    let token_stream = stream
        .map(|chunk| chunk.map_err(|e| Error::Inference(format!("stream error: {e}"))))
        .filter_map(|result| async move {
            match result {
                Ok(bytes) => parse_sse_chunk(&String::from_utf8_lossy(&bytes)),
                Err(e) => Some(Err(e)),
            }
        });

    Box::pin(token_stream)
}

/// HTTP streaming chat client.
pub struct ChatClient {
    client: reqwest::Client,
    config: ChatConfig,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self> {
        // Streams are open-ended; only the connection attempt is bounded.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Inference(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ChatConfig::from_env())
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }
}

#[async_trait]
impl StreamingChat for ChatClient {
    async fn stream_chat(
        &self,
        user_message: &str,
        context: &str,
        history: &[ChatMessage],
    ) -> Result<TokenStream> {
        let system = build_system_message(&self.config.prompt, context);

        let mut messages = vec![json!({"role": "system", "content": system})];
        for msg in history {
            messages.push(json!(WireMessage {
                role: role_str(msg.role),
                content: &msg.content,
            }));
        }
        messages.push(json!({"role": "user", "content": user_message}));

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
            "max_tokens": self.config.max_tokens,
        });

        debug!(
            subsystem = "inference",
            op = "stream_chat",
            model = %self.config.model,
            history_len = history.len(),
            payload_len = user_message.len(),
            "Opening chat stream"
        );

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req
            .send()
            .await
            .map_err(|e| Error::Inference(format!("chat request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "chat service returned {status}: {body}"
            )));
        }

        Ok(parse_sse_stream(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_wraps_context_in_ref_block() {
        let prompt = PromptConfig::default();
        let sys = build_system_message(&prompt, "[1] (a.pdf) Alpha beta.\n");
        assert!(sys.contains("<<REF>>\n[1] (a.pdf) Alpha beta.\n<<END>>"));
        assert!(sys.starts_with(&prompt.rules));
    }

    #[test]
    fn system_message_uses_no_result_line_when_empty() {
        let prompt = PromptConfig::default();
        let sys = build_system_message(&prompt, "");
        assert!(sys.contains("(No references were retrieved this round)"));
        assert!(sys.trim_end().ends_with("<<END>>"));
    }

    #[test]
    fn parse_sse_chunk_with_content() {
        let chunk = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_chunk(chunk).unwrap().unwrap(), "Hel");
    }

    #[test]
    fn parse_sse_chunk_done_marker() {
        assert!(parse_sse_chunk("data: [DONE]").is_none());
    }

    #[test]
    fn parse_sse_chunk_role_only_delta() {
        let chunk = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_sse_chunk(chunk).is_none());
    }

    #[test]
    fn parse_sse_chunk_multiple_data_lines() {
        let chunk = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"lo.\"}}]}";
        assert_eq!(parse_sse_chunk(chunk).unwrap().unwrap(), "Hello.");
    }

    #[test]
    fn parse_sse_chunk_invalid_json_is_an_error() {
        let result = parse_sse_chunk("data: {not json}");
        assert!(result.unwrap().is_err());
    }

    #[test]
    fn parse_sse_chunk_comment_and_blank_lines() {
        assert!(parse_sse_chunk(": keepalive").is_none());
        assert!(parse_sse_chunk("").is_none());
    }
}
