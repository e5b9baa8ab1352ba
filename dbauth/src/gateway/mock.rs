//! Gateway for deployments that run without authentication.
//!
//! Every request is the fixed `dbgpt` superuser, whether or not it carries a credential.
//! Mutations succeed without doing anything.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Gateway, LoginOutcome};
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
    catalog::DatabaseCatalog,
    errors::Result,
    types::UserId,
};

pub struct MockGateway {
    catalog: Arc<dyn DatabaseCatalog>,
}

impl MockGateway {
    pub fn new(catalog: Arc<dyn DatabaseCatalog>) -> Self {
        Self { catalog }
    }

    fn user() -> UserResponse {
        UserResponse::from(&CurrentUser::mock())
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn register(&self, request: RegisterRequest) -> Result<UserResponse> {
        debug!(username = %request.username, "Ignoring registration in mock mode");
        Ok(Self::user())
    }

    async fn login(&self, _request: LoginRequest, _metadata: ClientMetadata) -> Result<LoginOutcome> {
        Ok(LoginOutcome {
            user: Self::user(),
            session: None,
        })
    }

    async fn logout(&self, _credential: Option<Credential>) -> Result<()> {
        Ok(())
    }

    async fn authenticate(&self, _credential: Option<Credential>) -> Result<CurrentUser> {
        Ok(CurrentUser::mock())
    }

    async fn whoami(&self, user: &CurrentUser) -> Result<WhoAmIResponse> {
        Ok(WhoAmIResponse {
            user: UserResponse::from(user),
            permissions: user.permissions,
            accessible_databases: self.catalog.list_databases().await?,
        })
    }

    async fn list_users(&self, _requester: &CurrentUser, _pagination: Pagination) -> Result<UserListResponse> {
        Ok(UserListResponse {
            users: vec![Self::user()],
            total: 1,
        })
    }

    async fn grant_database_access(&self, _requester: &CurrentUser, _user_id: UserId, _db_name: &str) -> Result<()> {
        Ok(())
    }

    async fn revoke_database_access(&self, _requester: &CurrentUser, _user_id: UserId, _db_name: &str) -> Result<()> {
        Ok(())
    }

    async fn list_accessible_databases(&self, _requester: &CurrentUser, _user_id: Option<UserId>) -> Result<Vec<String>> {
        self.catalog.list_databases().await
    }

    async fn check_database_access(&self, _user: &CurrentUser, _db_name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn list_catalog_databases(&self, _requester: &CurrentUser) -> Result<Vec<String>> {
        self.catalog.list_databases().await
    }

    async fn refresh_session(&self, _credential: Credential) -> Result<Option<IssuedSession>> {
        Ok(None)
    }

    async fn change_password(&self, _user: &CurrentUser, _request: ChangePasswordRequest) -> Result<()> {
        Ok(())
    }

    async fn set_user_active(&self, _requester: &CurrentUser, _user_id: UserId, _is_active: bool) -> Result<UserResponse> {
        Ok(Self::user())
    }
}
