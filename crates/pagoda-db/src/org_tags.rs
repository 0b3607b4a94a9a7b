//! Organization tag repository implementation.
//!
//! Tag ids are compared byte-exactly; all lookups use plain equality so the
//! column's binary collation semantics carry through.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use pagoda_core::tags::DEFAULT_TAG;
use pagoda_core::{Error, OrganizationTag, Result, TagRepository};

/// Request for creating a tag.
#[derive(Debug, Clone)]
pub struct CreateTagRequest {
    pub tag_id: String,
    pub name: String,
    pub description: Option<String>,
    pub parent_tag: Option<String>,
    pub created_by: String,
}

/// Request for updating a tag. `parent_tag` of `Some(None)` clears the parent.
#[derive(Debug, Clone, Default)]
pub struct UpdateTagRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parent_tag: Option<Option<String>>,
}

/// PostgreSQL implementation of the tag forest.
#[derive(Clone)]
pub struct PgTagRepository {
    pool: PgPool,
}

const TAG_COLUMNS: &str =
    "id, tag_id, name, description, parent_tag, created_by, created_at, updated_at";

impl PgTagRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a tag; duplicate tag ids are a conflict.
    pub async fn create(&self, req: CreateTagRequest) -> Result<OrganizationTag> {
        let tag = sqlx::query_as::<_, OrganizationTag>(&format!(
            "INSERT INTO organization_tags (tag_id, name, description, parent_tag, created_by)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {TAG_COLUMNS}"
        ))
        .bind(&req.tag_id)
        .bind(&req.name)
        .bind(&req.description)
        .bind(&req.parent_tag)
        .bind(&req.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("tag '{}' already exists", req.tag_id))
            }
            _ => Error::Database(e),
        })?;

        Ok(tag)
    }

    /// Apply an update. The cycle check runs in the caller before this.
    pub async fn update(&self, tag_id: &str, req: UpdateTagRequest) -> Result<OrganizationTag> {
        let current = self
            .find_by_tag_id(tag_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("tag '{tag_id}'")))?;

        let name = req.name.unwrap_or(current.name);
        let description = match req.description {
            Some(d) => Some(d),
            None => current.description,
        };
        let parent_tag = match req.parent_tag {
            Some(p) => p,
            None => current.parent_tag,
        };

        let tag = sqlx::query_as::<_, OrganizationTag>(&format!(
            "UPDATE organization_tags
             SET name = $1, description = $2, parent_tag = $3, updated_at = $4
             WHERE tag_id = $5
             RETURNING {TAG_COLUMNS}"
        ))
        .bind(&name)
        .bind(&description)
        .bind(&parent_tag)
        .bind(Utc::now())
        .bind(tag_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(tag)
    }

    /// Delete a tag. Refused while it has children or is referenced by any
    /// user's assigned or primary set; `DEFAULT` is never deletable.
    pub async fn delete(&self, tag_id: &str) -> Result<()> {
        if tag_id == DEFAULT_TAG {
            return Err(Error::Conflict(
                "the DEFAULT tag cannot be deleted".to_string(),
            ));
        }

        if self.has_children(tag_id).await? {
            return Err(Error::Conflict(format!(
                "tag '{tag_id}' still has child tags"
            )));
        }

        if self.is_referenced_by_users(tag_id).await? {
            return Err(Error::Conflict(format!(
                "tag '{tag_id}' is still assigned to users"
            )));
        }

        let result = sqlx::query("DELETE FROM organization_tags WHERE tag_id = $1")
            .bind(tag_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("tag '{tag_id}'")));
        }
        Ok(())
    }

    /// Whether any tag names `tag_id` as its parent.
    pub async fn has_children(&self, tag_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM organization_tags WHERE parent_tag = $1)",
        )
        .bind(tag_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(exists)
    }

    /// Whether any user carries `tag_id` in the assigned set or as primary.
    pub async fn is_referenced_by_users(&self, tag_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE $1 = ANY(org_tags) OR primary_org = $1)",
        )
        .bind(tag_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(exists)
    }

    /// Create a tag if its id is not yet taken; returns whether it was created.
    ///
    /// Used for the `DEFAULT` tag and per-user `PRIVATE_<name>` tags at
    /// registration; racing registrations resolve via ON CONFLICT.
    pub async fn ensure(
        &self,
        tag_id: &str,
        name: &str,
        description: Option<&str>,
        created_by: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO organization_tags (tag_id, name, description, created_by)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (tag_id) DO NOTHING",
        )
        .bind(tag_id)
        .bind(name)
        .bind(description)
        .bind(created_by)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TagRepository for PgTagRepository {
    async fn find_by_tag_id(&self, tag_id: &str) -> Result<Option<OrganizationTag>> {
        let tag = sqlx::query_as::<_, OrganizationTag>(&format!(
            "SELECT {TAG_COLUMNS} FROM organization_tags WHERE tag_id = $1"
        ))
        .bind(tag_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(tag)
    }

    async fn list(&self) -> Result<Vec<OrganizationTag>> {
        let tags = sqlx::query_as::<_, OrganizationTag>(&format!(
            "SELECT {TAG_COLUMNS} FROM organization_tags ORDER BY tag_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(tags)
    }

    async fn exists(&self, tag_id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM organization_tags WHERE tag_id = $1)")
                .bind(tag_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(exists)
    }
}
