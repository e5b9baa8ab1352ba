//! Storage traits for users, roles, sessions and database access grants.
//!
//! Every component in the crate talks to persistence through [`Store`], which is the union of
//! four narrower traits. Two backends implement it:
//!
//! - [`in_memory::InMemoryStore`]: a single lock over plain maps, for tests and single-process use
//! - [`postgres::PostgresStore`]: the production backend
//!
//! Uniqueness (case-insensitive username and email, one grant per user/database pair, one row
//! per session id) is enforced by the backend itself, never by a read-then-write in the caller,
//! so concurrent writers cannot produce duplicates. Violations surface as
//! [`DbError::UniqueViolation`](crate::db::errors::DbError::UniqueViolation).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::errors::Result;
use crate::db::models::{
    database_access::DatabaseAccessDBResponse,
    roles::{RoleCreateDBRequest, RoleDBResponse},
    sessions::{SessionCreateDBRequest, SessionDBResponse},
    users::{UserCreateDBRequest, UserDBResponse},
};
use crate::types::{RoleId, UserId};

pub mod in_memory;
pub mod postgres;

#[cfg(test)]
mod tests;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Role persistence. Roles are created only at bootstrap.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Insert the role if no role with that name exists, then return the stored row.
    async fn ensure_role(&self, request: &RoleCreateDBRequest) -> Result<RoleDBResponse>;

    async fn get_role(&self, id: RoleId) -> Result<Option<RoleDBResponse>>;

    async fn get_role_by_name(&self, name: &str) -> Result<Option<RoleDBResponse>>;

    async fn list_roles(&self) -> Result<Vec<RoleDBResponse>>;
}

/// User account persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create a user.
    ///
    /// # Errors
    /// - `UniqueViolation` if the username or email is already taken (case-insensitive)
    /// - `ForeignKeyViolation` if the role does not exist
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;

    async fn get_user_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>>;

    /// Case-insensitive lookup.
    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>>;

    /// Case-insensitive lookup.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>>;

    /// Users ordered by creation time, oldest first.
    async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<UserDBResponse>>;

    async fn count_users(&self) -> Result<i64>;

    /// # Errors
    /// - `NotFound` if the user does not exist
    async fn update_last_login(&self, id: UserId, at: DateTime<Utc>) -> Result<()>;

    /// # Errors
    /// - `NotFound` if the user does not exist
    async fn update_password(&self, id: UserId, password_hash: &str, password_salt: &str) -> Result<()>;

    /// # Errors
    /// - `NotFound` if the user does not exist
    async fn set_user_active(&self, id: UserId, is_active: bool) -> Result<UserDBResponse>;
}

/// Session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new active session.
    ///
    /// # Errors
    /// - `UniqueViolation` if the session id already exists; the existing row is left untouched
    /// - `ForeignKeyViolation` if the user does not exist
    async fn create_session(&self, request: &SessionCreateDBRequest) -> Result<SessionDBResponse>;

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionDBResponse>>;

    /// Replace the token and expiry of an active session.
    ///
    /// # Errors
    /// - `NotFound` if no active session has this id
    async fn update_session_token(&self, session_id: &str, token: &str, expires_at: DateTime<Utc>) -> Result<SessionDBResponse>;

    /// Mark a session inactive. Returns whether an active session was changed.
    async fn deactivate_session(&self, session_id: &str) -> Result<bool>;

    /// Mark all of a user's sessions inactive. Returns how many were changed.
    async fn deactivate_user_sessions(&self, user_id: UserId) -> Result<u64>;

    /// Mark every active session with `expires_at <= now` inactive. Returns how many were changed.
    async fn deactivate_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Database access grant persistence.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Insert the `(user_id, db_name)` grant, or reactivate it if a row already exists.
    ///
    /// # Errors
    /// - `ForeignKeyViolation` if the user does not exist
    async fn upsert_grant(&self, user_id: UserId, db_name: &str, granted_by: UserId) -> Result<DatabaseAccessDBResponse>;

    /// Deactivate the grant. Returns whether an active grant was changed; absent grants are a no-op.
    async fn deactivate_grant(&self, user_id: UserId, db_name: &str) -> Result<bool>;

    /// Active grants for a user, ordered by database name.
    async fn list_active_grants(&self, user_id: UserId) -> Result<Vec<DatabaseAccessDBResponse>>;

    async fn has_active_grant(&self, user_id: UserId, db_name: &str) -> Result<bool>;
}

/// Everything the auth core persists, behind one handle.
pub trait Store: RoleStore + UserStore + SessionStore + GrantStore {}

impl<T> Store for T where T: RoleStore + UserStore + SessionStore + GrantStore {}
