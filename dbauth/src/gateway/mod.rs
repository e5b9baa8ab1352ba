//! The request-facing auth facade.
//!
//! Handlers never talk to the store, hasher or session manager directly; they call a
//! [`Gateway`]. Which implementation serves the process is decided once at startup from
//! `auth.mode`:
//!
//! - [`NativeGateway`]: real accounts, password login, server-side sessions and grants
//! - [`MockGateway`]: no authentication at all; every caller is the same superuser
//!
//! Admin-only operations run the permission check before any mutation.

use async_trait::async_trait;

use crate::{
    api::models::{
        auth::{ChangePasswordRequest, LoginRequest, RegisterRequest, WhoAmIResponse},
        pagination::Pagination,
        users::{UserListResponse, UserResponse},
    },
    auth::{
        current_user::CurrentUser,
        session::{ClientMetadata, Credential, IssuedSession},
    },
    errors::Result,
    types::UserId,
};

pub mod mock;
pub mod native;

pub use mock::MockGateway;
pub use native::NativeGateway;

/// Outcome of a successful login. `session` is `None` when no session is kept.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: UserResponse,
    pub session: Option<IssuedSession>,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Create a new account with the `user` role.
    async fn register(&self, request: RegisterRequest) -> Result<UserResponse>;

    /// Check credentials and open a session.
    async fn login(&self, request: LoginRequest, metadata: ClientMetadata) -> Result<LoginOutcome>;

    /// End the session a credential refers to. Always succeeds for unknown or dead sessions.
    async fn logout(&self, credential: Option<Credential>) -> Result<()>;

    /// Resolve a presented credential (or its absence) to the caller.
    async fn authenticate(&self, credential: Option<Credential>) -> Result<CurrentUser>;

    async fn whoami(&self, user: &CurrentUser) -> Result<WhoAmIResponse>;

    /// Admin only.
    async fn list_users(&self, requester: &CurrentUser, pagination: Pagination) -> Result<UserListResponse>;

    /// Admin only.
    async fn grant_database_access(&self, requester: &CurrentUser, user_id: UserId, db_name: &str) -> Result<()>;

    /// Admin only.
    async fn revoke_database_access(&self, requester: &CurrentUser, user_id: UserId, db_name: &str) -> Result<()>;

    /// The caller's databases, or another user's when `user_id` is given (admin only).
    async fn list_accessible_databases(&self, requester: &CurrentUser, user_id: Option<UserId>) -> Result<Vec<String>>;

    async fn check_database_access(&self, user: &CurrentUser, db_name: &str) -> Result<bool>;

    /// Admin only.
    async fn list_catalog_databases(&self, requester: &CurrentUser) -> Result<Vec<String>>;

    /// Extend the session a credential refers to.
    async fn refresh_session(&self, credential: Credential) -> Result<Option<IssuedSession>>;

    /// Change the caller's password and end all of their sessions.
    async fn change_password(&self, user: &CurrentUser, request: ChangePasswordRequest) -> Result<()>;

    /// Admin only. Deactivation ends all of the target's sessions.
    async fn set_user_active(&self, requester: &CurrentUser, user_id: UserId, is_active: bool) -> Result<UserResponse>;
}
