use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::{
    AppState,
    api::models::users::{ListUsersQuery, SetUserActiveRequest, SetUserActiveResponse, UserListResponse},
    auth::current_user::CurrentUser,
    errors::{Error, ErrorBody},
    types::UserId,
};

/// List all users (admin only)
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Page of users", body = UserListResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Administrator privileges required", body = ErrorBody),
    ),
    security(("session_cookie" = []), ("bearer_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
    current_user: CurrentUser,
) -> Result<Json<UserListResponse>, Error> {
    Ok(Json(state.gateway.list_users(&current_user, query.pagination).await?))
}

/// Activate or deactivate a user (admin only). Deactivation ends the user's sessions.
#[utoipa::path(
    patch,
    path = "/users/{user_id}/active",
    tag = "users",
    request_body = SetUserActiveRequest,
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User updated", body = SetUserActiveResponse),
        (status = 400, description = "Cannot deactivate yourself", body = ErrorBody),
        (status = 403, description = "Administrator privileges required", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    security(("session_cookie" = []), ("bearer_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn set_user_active(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: CurrentUser,
    Json(request): Json<SetUserActiveRequest>,
) -> Result<Json<SetUserActiveResponse>, Error> {
    let user = state.gateway.set_user_active(&current_user, user_id, request.is_active).await?;
    let message = if user.is_active { "User activated" } else { "User deactivated" };
    Ok(Json(SetUserActiveResponse {
        success: true,
        message: message.to_string(),
        user,
    }))
}
