//! PostgreSQL storage implementation.
//!
//! Each operation is a single statement, so a cancelled request never leaves a partial write.
//! Uniqueness lives in the schema (`migrations/`): unique indexes on `LOWER(username)` and
//! `LOWER(email)`, `UNIQUE (user_id, db_name)` on grants and `UNIQUE (session_id)` on sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::{GrantStore, RoleStore, SessionStore, UserStore};
use crate::db::errors::{DbError, Result};
use crate::db::models::{
    database_access::DatabaseAccessDBResponse,
    roles::{RoleCreateDBRequest, RoleDBResponse},
    sessions::{SessionCreateDBRequest, SessionDBResponse},
    users::{UserCreateDBRequest, UserDBResponse},
};
use crate::types::{RoleId, UserId, abbrev_uuid};

const ROLE_COLUMNS: &str = "id, name, description, perm_chat, perm_explore, perm_construct, perm_admin, created_at, updated_at";

const USER_COLUMNS: &str = "id, username, email, password_hash, password_salt, full_name, avatar_url, \
     is_active, is_superuser, role_id, last_login, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, session_id, user_id, token, expires_at, is_active, user_agent, ip_address, created_at, updated_at";

const GRANT_COLUMNS: &str = "id, user_id, db_name, granted_by, is_active, created_at, updated_at";

/// PostgreSQL implementation of [`Store`](super::Store).
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RoleStore for PostgresStore {
    #[instrument(skip(self, request), fields(role = %request.name), err)]
    async fn ensure_role(&self, request: &RoleCreateDBRequest) -> Result<RoleDBResponse> {
        // DO NOTHING returns no row on conflict, so fall through to a plain read
        let inserted = sqlx::query_as::<_, RoleDBResponse>(&format!(
            "INSERT INTO roles (id, name, description, perm_chat, perm_explore, perm_construct, perm_admin)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (name) DO NOTHING
             RETURNING {ROLE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(request.name.as_str())
        .bind(&request.description)
        .bind(request.permissions.chat)
        .bind(request.permissions.explore)
        .bind(request.permissions.construct)
        .bind(request.permissions.admin)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(role) => Ok(role),
            None => self.get_role_by_name(request.name.as_str()).await?.ok_or(DbError::NotFound),
        }
    }

    #[instrument(skip(self), fields(role_id = %abbrev_uuid(&id)), err)]
    async fn get_role(&self, id: RoleId) -> Result<Option<RoleDBResponse>> {
        let role = sqlx::query_as::<_, RoleDBResponse>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    #[instrument(skip(self), err)]
    async fn get_role_by_name(&self, name: &str) -> Result<Option<RoleDBResponse>> {
        let role = sqlx::query_as::<_, RoleDBResponse>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self) -> Result<Vec<RoleDBResponse>> {
        let roles = sqlx::query_as::<_, RoleDBResponse>(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"))
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            "INSERT INTO users (id, username, email, password_hash, password_salt, full_name, avatar_url, role_id, is_superuser, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&request.username)
        .bind(&request.email)
        .bind(&request.password_hash)
        .bind(&request.password_salt)
        .bind(&request.full_name)
        .bind(&request.avatar_url)
        .bind(request.role_id)
        .bind(request.is_superuser)
        .bind(request.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_user_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(username) = LOWER($1)"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self, email), err)]
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<UserDBResponse>> {
        let users = sqlx::query_as::<_, UserDBResponse>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, id ASC OFFSET $1 LIMIT $2"
        ))
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    #[instrument(skip(self), err)]
    async fn count_users(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(&self.pool).await?;
        Ok(count)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update_last_login(&self, id: UserId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE users SET last_login = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, password_hash, password_salt), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update_password(&self, id: UserId, password_hash: &str, password_salt: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2, password_salt = $3, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .bind(password_salt)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn set_user_active(&self, id: UserId, is_active: bool) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            "UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;
        user.ok_or(DbError::NotFound)
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    async fn create_session(&self, request: &SessionCreateDBRequest) -> Result<SessionDBResponse> {
        let session = sqlx::query_as::<_, SessionDBResponse>(&format!(
            "INSERT INTO sessions (id, session_id, user_id, token, expires_at, is_active, user_agent, ip_address)
             VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&request.session_id)
        .bind(request.user_id)
        .bind(&request.token)
        .bind(request.expires_at)
        .bind(&request.user_agent)
        .bind(&request.ip_address)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    #[instrument(skip_all, err)]
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionDBResponse>> {
        let session = sqlx::query_as::<_, SessionDBResponse>(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = $1"))
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    #[instrument(skip_all, err)]
    async fn update_session_token(&self, session_id: &str, token: &str, expires_at: DateTime<Utc>) -> Result<SessionDBResponse> {
        let session = sqlx::query_as::<_, SessionDBResponse>(&format!(
            "UPDATE sessions SET token = $2, expires_at = $3, updated_at = NOW()
             WHERE session_id = $1 AND is_active
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session_id)
        .bind(token)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;
        session.ok_or(DbError::NotFound)
    }

    #[instrument(skip_all, err)]
    async fn deactivate_session(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET is_active = FALSE, updated_at = NOW() WHERE session_id = $1 AND is_active")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn deactivate_user_sessions(&self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE sessions SET is_active = FALSE, updated_at = NOW() WHERE user_id = $1 AND is_active")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn deactivate_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("UPDATE sessions SET is_active = FALSE, updated_at = NOW() WHERE is_active AND expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl GrantStore for PostgresStore {
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), granted_by = %abbrev_uuid(&granted_by)), err)]
    async fn upsert_grant(&self, user_id: UserId, db_name: &str, granted_by: UserId) -> Result<DatabaseAccessDBResponse> {
        let grant = sqlx::query_as::<_, DatabaseAccessDBResponse>(&format!(
            "INSERT INTO user_db_access (id, user_id, db_name, granted_by, is_active)
             VALUES ($1, $2, $3, $4, TRUE)
             ON CONFLICT (user_id, db_name)
             DO UPDATE SET is_active = TRUE, granted_by = EXCLUDED.granted_by, updated_at = NOW()
             RETURNING {GRANT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(db_name)
        .bind(granted_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(grant)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn deactivate_grant(&self, user_id: UserId, db_name: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE user_db_access SET is_active = FALSE, updated_at = NOW() WHERE user_id = $1 AND db_name = $2 AND is_active",
        )
        .bind(user_id)
        .bind(db_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn list_active_grants(&self, user_id: UserId) -> Result<Vec<DatabaseAccessDBResponse>> {
        let grants = sqlx::query_as::<_, DatabaseAccessDBResponse>(&format!(
            "SELECT {GRANT_COLUMNS} FROM user_db_access WHERE user_id = $1 AND is_active ORDER BY db_name"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(grants)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn has_active_grant(&self, user_id: UserId, db_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM user_db_access WHERE user_id = $1 AND db_name = $2 AND is_active)",
        )
        .bind(user_id)
        .bind(db_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
