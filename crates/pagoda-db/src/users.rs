//! User repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use pagoda_core::{CreateUserRequest, Error, Result, User, UserRepository, UserRole};

/// PostgreSQL implementation of [`UserRepository`].
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> User {
        User {
            id: row.get("id"),
            username: row.get("username"),
            password_hash: row.get("password_hash"),
            role: UserRole::from_str_loose(row.get::<String, _>("role").as_str()),
            org_tags: row.get("org_tags"),
            primary_org: row.get("primary_org"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

const USER_COLUMNS: &str =
    "id, username, password_hash, role, org_tags, primary_org, created_at, updated_at";

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, req: CreateUserRequest) -> Result<User> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (username, password_hash, role, org_tags, primary_org)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&req.username)
        .bind(&req.password_hash)
        .bind(req.role.as_str())
        .bind(&req.org_tags)
        .bind(&req.primary_org)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("username '{}' is already taken", req.username))
            }
            _ => Error::Database(e),
        })?;

        Ok(Self::parse_row(row))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_row))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_row))
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_row).collect())
    }

    async fn update_org_tags(
        &self,
        username: &str,
        org_tags: &[String],
        primary_org: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET org_tags = $1, primary_org = $2, updated_at = $3 WHERE username = $4",
        )
        .bind(org_tags)
        .bind(primary_org)
        .bind(Utc::now())
        .bind(username)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user '{username}'")));
        }
        Ok(())
    }
}
