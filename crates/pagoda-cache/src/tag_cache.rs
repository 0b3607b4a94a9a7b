//! Read-through cache of effective organization tag sets.
//!
//! Per user, the expanded tag set is memoized for 24 hours with a sliding
//! TTL under `user:effective_org_tags:<username>`. Admin tag mutations
//! invalidate globally; tag reassignment invalidates per user. On any
//! repository or store failure the resolver degrades to `{DEFAULT}` so
//! search keeps working with universal-scope visibility only.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, error, warn};

use crate::Cache;
use pagoda_core::tags::{expand_effective_tags, DEFAULT_TAG};
use pagoda_core::{EffectiveTags, Result, TagRepository, UserRepository};

const EFFECTIVE_TAGS_PREFIX: &str = "user:effective_org_tags:";

/// Cache-backed effective-tag resolver.
#[derive(Clone)]
pub struct TagResolver {
    cache: Cache,
    users: Arc<dyn UserRepository>,
    tags: Arc<dyn TagRepository>,
    ttl_secs: u64,
}

impl TagResolver {
    pub fn new(cache: Cache, users: Arc<dyn UserRepository>, tags: Arc<dyn TagRepository>) -> Self {
        Self {
            cache,
            users,
            tags,
            ttl_secs: pagoda_core::defaults::TAG_CACHE_TTL_SECS,
        }
    }

    fn key(username: &str) -> String {
        format!("{EFFECTIVE_TAGS_PREFIX}{username}")
    }

    /// Resolve with the fallible path; callers wanting the degrading
    /// behavior go through the [`EffectiveTags`] impl.
    pub async fn resolve(&self, username: &str) -> Result<Vec<String>> {
        let key = Self::key(username);
        let mut conn = self.cache.conn.clone();

        let cached: Vec<String> = conn.lrange(&key, 0, -1).await.unwrap_or_default();
        if !cached.is_empty() {
            // Sliding TTL: touching the entry renews it.
            let _: std::result::Result<(), _> = conn.expire(&key, self.ttl_secs as i64).await;
            let mut tags = cached;
            if !tags.iter().any(|t| t == DEFAULT_TAG) {
                tags.push(DEFAULT_TAG.to_string());
            }
            debug!(user = %username, count = tags.len(), "Effective tags served from cache");
            return Ok(tags);
        }

        // Miss: materialize from the repository.
        let assigned = self
            .users
            .find_by_username(username)
            .await?
            .map(|u| u.org_tags)
            .unwrap_or_default();

        let effective = expand_effective_tags(self.tags.as_ref(), &assigned).await?;
        let tags: Vec<String> = effective.into_iter().collect();

        // Write-back atomically: fresh list plus TTL in one pipeline.
        let write: std::result::Result<(), redis::RedisError> = redis::pipe()
            .atomic()
            .del(&key)
            .rpush(&key, &tags)
            .expire(&key, self.ttl_secs as i64)
            .query_async(&mut conn)
            .await;
        if let Err(e) = write {
            warn!(user = %username, error = %e, "Failed to cache effective tags");
        }

        Ok(tags)
    }

    /// Drop one user's cached set (tag reassignment).
    pub async fn invalidate_user(&self, username: &str) -> Result<()> {
        let mut conn = self.cache.conn.clone();
        let _: () = conn.del(Self::key(username)).await?;
        Ok(())
    }

    /// Drop every cached set (tag create/update/delete).
    pub async fn invalidate_all(&self) -> Result<()> {
        let mut conn = self.cache.conn.clone();
        let pattern = format!("{EFFECTIVE_TAGS_PREFIX}*");

        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let _: () = conn.del(&keys[..]).await?;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EffectiveTags for TagResolver {
    async fn effective_tags(&self, username: &str) -> Vec<String> {
        match self.resolve(username).await {
            Ok(tags) => tags,
            Err(e) => {
                error!(user = %username, error = %e, "Effective tag resolution failed; degrading to DEFAULT");
                vec![DEFAULT_TAG.to_string()]
            }
        }
    }
}
