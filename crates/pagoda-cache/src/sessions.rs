//! Session/token store.
//!
//! Sessions are opaque handles. A handle is valid iff `valid:<handle>`
//! exists AND `blacklist:<handle>` does not. Refresh handles are a separate
//! key family (`refresh:<handle>`) with a longer TTL and cannot be presented
//! as session handles, nor vice versa. `user:<id>:tokens` tracks a user's
//! live handles so "logout all" can blacklist each one.

use chrono::Utc;
use rand::RngCore;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Cache;
use pagoda_core::defaults::{REFRESH_TTL_SECS, SESSION_GRACE_SECS, SESSION_TTL_SECS};
use pagoda_core::{Result, UserRole};

const VALID_PREFIX: &str = "valid:";
const REFRESH_PREFIX: &str = "refresh:";
const BLACKLIST_PREFIX: &str = "blacklist:";

/// Authenticated subject recorded under a session handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSubject {
    pub user_id: i64,
    pub username: String,
    pub role: UserRole,
    /// Raw assigned tags at login time; the guard checks these literally.
    pub org_tags: Vec<String>,
    /// Unix seconds of logical expiry.
    pub expires_at: i64,
}

/// Record stored under a refresh handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRecord {
    pub user_id: i64,
    pub session_handle: String,
    pub expires_at: i64,
}

/// Redis-backed session store.
#[derive(Clone)]
pub struct SessionStore {
    cache: Cache,
}

/// A freshly generated opaque handle: 32 random bytes, hex-encoded.
pub fn new_handle() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn user_tokens_key(user_id: i64) -> String {
    format!("user:{user_id}:tokens")
}

impl SessionStore {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Issue a session handle for `subject` fields; returns the handle.
    pub async fn create_session(
        &self,
        user_id: i64,
        username: &str,
        role: UserRole,
        org_tags: &[String],
    ) -> Result<String> {
        let handle = new_handle();
        let expires_at = Utc::now().timestamp() + SESSION_TTL_SECS as i64;
        let subject = SessionSubject {
            user_id,
            username: username.to_string(),
            role,
            org_tags: org_tags.to_vec(),
            expires_at,
        };

        let mut conn = self.cache.conn.clone();
        let ttl = SESSION_TTL_SECS + SESSION_GRACE_SECS;
        let _: () = conn
            .set_ex(
                format!("{VALID_PREFIX}{handle}"),
                serde_json::to_string(&subject)?,
                ttl,
            )
            .await?;

        let tokens_key = user_tokens_key(user_id);
        let _: () = conn.sadd(&tokens_key, &handle).await?;
        let _: () = conn.expire(&tokens_key, ttl as i64).await?;

        debug!(user = %username, "Session handle issued");
        Ok(handle)
    }

    /// Issue a refresh handle bound to a session handle.
    pub async fn create_refresh(&self, user_id: i64, session_handle: &str) -> Result<String> {
        let handle = new_handle();
        let record = RefreshRecord {
            user_id,
            session_handle: session_handle.to_string(),
            expires_at: Utc::now().timestamp() + REFRESH_TTL_SECS as i64,
        };

        let mut conn = self.cache.conn.clone();
        let _: () = conn
            .set_ex(
                format!("{REFRESH_PREFIX}{handle}"),
                serde_json::to_string(&record)?,
                REFRESH_TTL_SECS,
            )
            .await?;
        Ok(handle)
    }

    /// Validate a session handle: listed, not blacklisted, not past expiry.
    pub async fn validate(&self, handle: &str) -> Result<Option<SessionSubject>> {
        let mut conn = self.cache.conn.clone();

        let blacklisted: bool = conn.exists(format!("{BLACKLIST_PREFIX}{handle}")).await?;
        if blacklisted {
            return Ok(None);
        }

        let json: Option<String> = conn.get(format!("{VALID_PREFIX}{handle}")).await?;
        let Some(json) = json else {
            return Ok(None);
        };

        let subject: SessionSubject = serde_json::from_str(&json)?;
        if subject.expires_at <= Utc::now().timestamp() {
            return Ok(None);
        }
        Ok(Some(subject))
    }

    /// Look up a refresh handle; `None` when unknown or expired.
    pub async fn validate_refresh(&self, handle: &str) -> Result<Option<RefreshRecord>> {
        let mut conn = self.cache.conn.clone();
        let json: Option<String> = conn.get(format!("{REFRESH_PREFIX}{handle}")).await?;
        let Some(json) = json else {
            return Ok(None);
        };
        let record: RefreshRecord = serde_json::from_str(&json)?;
        if record.expires_at <= Utc::now().timestamp() {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Revoke a session handle: blacklist for its remaining lifetime, drop
    /// the valid key, remove it from the user's set.
    pub async fn revoke(&self, handle: &str) -> Result<()> {
        let mut conn = self.cache.conn.clone();

        let json: Option<String> = conn.get(format!("{VALID_PREFIX}{handle}")).await?;
        if let Some(json) = json {
            let subject: SessionSubject = serde_json::from_str(&json)?;
            let remaining = subject.expires_at - Utc::now().timestamp();
            if remaining > 0 {
                let _: () = conn
                    .set_ex(
                        format!("{BLACKLIST_PREFIX}{handle}"),
                        Utc::now().timestamp(),
                        remaining as u64,
                    )
                    .await?;
            }
            let _: () = conn.del(format!("{VALID_PREFIX}{handle}")).await?;
            let _: () = conn
                .srem(user_tokens_key(subject.user_id), handle)
                .await?;
            info!(user = %subject.username, "Session handle revoked");
        }
        Ok(())
    }

    /// Drop a refresh handle.
    pub async fn revoke_refresh(&self, handle: &str) -> Result<()> {
        let mut conn = self.cache.conn.clone();
        let _: () = conn.del(format!("{REFRESH_PREFIX}{handle}")).await?;
        Ok(())
    }

    /// Revoke every live handle of a user and clear the tracking set.
    pub async fn revoke_all(&self, user_id: i64) -> Result<()> {
        let mut conn = self.cache.conn.clone();
        let handles: Vec<String> = conn.smembers(user_tokens_key(user_id)).await?;
        for handle in &handles {
            self.revoke(handle).await?;
        }
        let _: () = conn.del(user_tokens_key(user_id)).await?;
        info!(user_id, count = handles.len(), "All sessions revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_64_hex_chars_and_unique() {
        let a = new_handle();
        let b = new_handle();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn subject_round_trips_through_json() {
        let subject = SessionSubject {
            user_id: 7,
            username: "alice".into(),
            role: UserRole::Admin,
            org_tags: vec!["eng".into(), "PRIVATE_alice".into()],
            expires_at: 1_900_000_000,
        };
        let json = serde_json::to_string(&subject).unwrap();
        let back: SessionSubject = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_id, 7);
        assert_eq!(back.role, UserRole::Admin);
        assert_eq!(back.org_tags.len(), 2);
    }

    #[test]
    fn key_families_are_distinct() {
        // A refresh handle can never look like a session handle because the
        // key prefixes differ.
        assert_ne!(VALID_PREFIX, REFRESH_PREFIX);
        assert_ne!(VALID_PREFIX, BLACKLIST_PREFIX);
        assert_eq!(user_tokens_key(42), "user:42:tokens");
    }
}
