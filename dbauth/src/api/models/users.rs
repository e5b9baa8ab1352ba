//! API request/response models for users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::{
    auth::current_user::CurrentUser,
    db::models::{roles::RoleDBResponse, users::UserDBResponse},
    types::{RoleId, UserId},
};

/// A user as returned by the API. Password material is never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    #[schema(value_type = String, format = "uuid")]
    pub role_id: RoleId,
    pub role_name: String,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserResponse {
    pub fn from_parts(user: UserDBResponse, role: &RoleDBResponse) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar_url: user.avatar_url,
            is_active: user.is_active,
            is_superuser: user.is_superuser,
            role_id: role.id,
            role_name: role.name.clone(),
            last_login: user.last_login,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl From<&CurrentUser> for UserResponse {
    /// For identities that have no stored row, such as the mock user
    fn from(user: &CurrentUser) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            avatar_url: user.avatar_url.clone(),
            is_active: true,
            is_superuser: user.is_superuser,
            role_id: RoleId::nil(),
            role_name: user.role.clone(),
            last_login: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Query parameters for listing users
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListUsersQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    /// Total number of users, independent of the page
    pub total: i64,
}

/// Activate or deactivate an account
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetUserActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetUserActiveResponse {
    pub success: bool,
    pub message: String,
    pub user: UserResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_response_has_no_password_fields() {
        let response = UserResponse::from(&CurrentUser::mock());
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["username"], "dbgpt");
        assert_eq!(json["role_name"], "admin");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("password_salt").is_none());
    }
}
