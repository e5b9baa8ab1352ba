//! The authenticated caller and the extractors that produce it.
//!
//! Credentials are looked for in this order:
//! 1. the session cookie (configured name, `dbgpt_auth_session` by default) carrying a session id
//! 2. an `Authorization: Bearer <token>` header carrying a signed session token
//!
//! Resolving a credential to a user is the gateway's job, so the same extractor serves both the
//! native and the mock gateway.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use serde::Serialize;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, instrument, trace};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    AppState,
    auth::{
        permissions::{Permissions, RoleName},
        session::{ClientMetadata, Credential},
    },
    db::models::{roles::RoleDBResponse, users::UserDBResponse},
    errors::{Error, Result},
    types::UserId,
};

/// An authenticated user, as seen by authorization checks and handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_superuser: bool,
    pub role: String,
    pub permissions: Permissions,
}

impl CurrentUser {
    pub fn from_parts(user: &UserDBResponse, role: &RoleDBResponse) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            avatar_url: user.avatar_url.clone(),
            is_superuser: user.is_superuser,
            role: role.name.clone(),
            permissions: role.permissions(),
        }
    }

    /// The fixed identity every request resolves to in mock mode.
    pub fn mock() -> Self {
        Self {
            id: Uuid::nil(),
            username: "dbgpt".to_string(),
            email: "admin@dbgpt.com".to_string(),
            full_name: Some("DB-GPT".to_string()),
            avatar_url: None,
            is_superuser: true,
            role: RoleName::Admin.as_str().to_string(),
            permissions: Permissions::ALL,
        }
    }

    /// Per-user storage namespace: `{bucket}_{username}`.
    pub fn bucket_name(&self, bucket: &str) -> String {
        format!("{bucket}_{}", self.username)
    }
}

/// Find the session cookie or bearer token in request headers. The cookie wins if both are sent.
pub fn extract_credential(headers: &HeaderMap, cookie_name: &str) -> Option<Credential> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| Credential::SessionId(value.to_string()));

    if from_cookie.is_some() {
        return from_cookie;
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| Credential::Token(token.to_string()))
}

/// Client details recorded alongside new sessions.
pub fn client_metadata(headers: &HeaderMap) -> ClientMetadata {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

    ClientMetadata {
        user_agent: header_str(header::USER_AGENT.as_str()),
        // First hop of X-Forwarded-For is the original client
        ip_address: header_str("x-forwarded-for")
            .and_then(|v| v.split(',').next().and_then(parse_client_ip))
            .or_else(|| header_str("x-real-ip").as_deref().and_then(parse_client_ip))
            .map(|ip| ip.to_string()),
    }
}

/// Client-supplied address headers are only kept when they hold an IP (optionally with a port).
fn parse_client_ip(value: &str) -> Option<IpAddr> {
    let value = value.trim();
    value
        .parse::<IpAddr>()
        .or_else(|_| value.parse::<SocketAddr>().map(|addr| addr.ip()))
        .ok()
}

/// Whatever credential the request carries, if any. Never rejects.
#[derive(Debug, Clone)]
pub struct MaybeCredential(pub Option<Credential>);

impl FromRequestParts<AppState> for MaybeCredential {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> std::result::Result<Self, Self::Rejection> {
        Ok(MaybeCredential(extract_credential(
            &parts.headers,
            &state.config.auth.native.session.cookie_name,
        )))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientMetadata {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        Ok(client_metadata(&parts.headers))
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let credential = extract_credential(&parts.headers, &state.config.auth.native.session.cookie_name);
        if credential.is_none() {
            trace!("No session cookie or bearer token in request");
        }

        let user = state.gateway.authenticate(credential).await?;
        debug!("Authenticated user: {}", user.username);
        Ok(user)
    }
}
