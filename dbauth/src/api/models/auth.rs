use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{api::models::users::UserResponse, auth::permissions::Permissions, errors::Error};

/// Request to register a new user
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    /// Username, 3 to 128 characters (must be unique, case-insensitive)
    pub username: String,
    /// Email address (must be unique, case-insensitive)
    pub email: String,
    /// Password (will be hashed)
    pub password: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub user: UserResponse,
}

/// Request to login
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email address
    pub username: String,
    pub password: String,
}

/// Response after successful login.
///
/// Session fields are absent when running without authentication.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub user: UserResponse,
    pub session_id: Option<String>,
    /// Signed session token, usable as `Authorization: Bearer <token>`
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Response after a session refresh
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub success: bool,
    pub message: String,
    pub session_id: Option<String>,
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Generic success response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthSuccessResponse {
    pub success: bool,
    pub message: String,
}

impl AuthSuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// The authenticated caller with everything the UI needs to gate features
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WhoAmIResponse {
    pub user: UserResponse,
    pub permissions: Permissions,
    pub accessible_databases: Vec<String>,
}

/// Request to change password (for authenticated users)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    /// Current password (for verification)
    pub current_password: String,
    pub new_password: String,
}

/// A JSON body plus an optional `Set-Cookie` header.
pub struct WithSessionCookie<T> {
    pub status: StatusCode,
    pub body: T,
    pub cookie: Option<String>,
}

impl<T> WithSessionCookie<T> {
    pub fn ok(body: T, cookie: Option<String>) -> Self {
        Self {
            status: StatusCode::OK,
            body,
            cookie,
        }
    }
}

impl<T: Serialize> IntoResponse for WithSessionCookie<T> {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(cookie) = self.cookie {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().insert(header::SET_COOKIE, value);
                }
                Err(e) => {
                    return Error::Internal {
                        operation: format!("build session cookie header: {e}"),
                    }
                    .into_response();
                }
            }
        }
        response
    }
}
