//! Conversation persistence for the chat orchestrator.
//!
//! A user has one current conversation id under
//! `user:<userId>:current_conversation`, and the message list lives as JSON
//! under `conversation:<id>`. Both carry a 7-day sliding TTL; the history is
//! capped at the most recent 20 messages at append time.

use redis::AsyncCommands;
use tracing::{debug, info};
use uuid::Uuid;

use crate::Cache;
use pagoda_core::defaults::{CONVERSATION_MAX_MESSAGES, CONVERSATION_TTL_SECS};
use pagoda_core::{ChatMessage, MessageRole, Result};

/// Redis-backed conversation store.
#[derive(Clone)]
pub struct ConversationStore {
    cache: Cache,
}

fn pointer_key(user_id: &str) -> String {
    format!("user:{user_id}:current_conversation")
}

fn history_key(conversation_id: &str) -> String {
    format!("conversation:{conversation_id}")
}

/// Append a user/assistant pair and cap the history, in memory.
pub fn append_turns(
    mut history: Vec<ChatMessage>,
    user_message: &str,
    assistant_message: &str,
    timestamp: &str,
) -> Vec<ChatMessage> {
    history.push(ChatMessage {
        role: MessageRole::User,
        content: user_message.to_string(),
        timestamp: timestamp.to_string(),
    });
    history.push(ChatMessage {
        role: MessageRole::Assistant,
        content: assistant_message.to_string(),
        timestamp: timestamp.to_string(),
    });

    if history.len() > CONVERSATION_MAX_MESSAGES {
        history.drain(..history.len() - CONVERSATION_MAX_MESSAGES);
    }
    history
}

impl ConversationStore {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// The user's current conversation id, created on first use. Access
    /// renews the 7-day TTL.
    pub async fn current_conversation(&self, user_id: &str) -> Result<String> {
        let key = pointer_key(user_id);
        let mut conn = self.cache.conn.clone();

        if let Some(id) = conn.get::<_, Option<String>>(&key).await? {
            let _: () = conn.expire(&key, CONVERSATION_TTL_SECS as i64).await?;
            debug!(user_id = %user_id, conversation_id = %id, "Reusing current conversation");
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        let _: () = conn
            .set_ex(&key, &id, CONVERSATION_TTL_SECS)
            .await?;
        info!(user_id = %user_id, conversation_id = %id, "Started conversation");
        Ok(id)
    }

    /// Stored history, oldest first. Missing or unparsable history reads as
    /// empty rather than failing the chat turn.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let mut conn = self.cache.conn.clone();
        let json: Option<String> = conn.get(history_key(conversation_id)).await?;
        let Some(json) = json else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_str(&json).unwrap_or_default())
    }

    /// Append one exchange, truncate to the cap, and persist with a renewed
    /// 7-day TTL.
    pub async fn append_exchange(
        &self,
        conversation_id: &str,
        user_message: &str,
        assistant_message: &str,
        timestamp: &str,
    ) -> Result<()> {
        let history = self.history(conversation_id).await?;
        let history = append_turns(history, user_message, assistant_message, timestamp);

        let mut conn = self.cache.conn.clone();
        let json = serde_json::to_string(&history)?;
        let _: () = conn
            .set_ex(history_key(conversation_id), json, CONVERSATION_TTL_SECS)
            .await?;
        debug!(conversation_id = %conversation_id, len = history.len(), "Conversation history persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: MessageRole, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.to_string(),
            timestamp: "2026-01-01T00:00:00".to_string(),
        }
    }

    #[test]
    fn append_turns_adds_pair_in_order() {
        let history = append_turns(Vec::new(), "Hi", "Hello.", "2026-01-01T00:00:00");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[0].content, "Hi");
        assert_eq!(history[1].role, MessageRole::Assistant);
        assert_eq!(history[1].content, "Hello.");
    }

    #[test]
    fn append_turns_caps_at_twenty() {
        let mut history = Vec::new();
        for i in 0..12 {
            history.push(msg(MessageRole::User, &format!("q{i}")));
            history.push(msg(MessageRole::Assistant, &format!("a{i}")));
        }
        assert_eq!(history.len(), 24);

        let history = append_turns(history, "latest", "reply", "t");
        assert_eq!(history.len(), CONVERSATION_MAX_MESSAGES);
        // The newest pair survives at the tail.
        assert_eq!(history.last().unwrap().content, "reply");
        assert_eq!(history[history.len() - 2].content, "latest");
        // The oldest entries were dropped.
        assert_eq!(history[0].content, "q3");
    }

    #[test]
    fn key_formats() {
        assert_eq!(pointer_key("42"), "user:42:current_conversation");
        assert_eq!(history_key("abc"), "conversation:abc");
    }
}
