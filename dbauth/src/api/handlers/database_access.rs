use axum::{
    Json,
    extract::{Query, State},
};

use crate::{
    AppState,
    api::models::database_access::{
        AccessibleDatabasesQuery, CheckAccessQuery, CheckAccessResponse, DatabaseAccessRequest, DatabaseAccessResponse,
        DatabaseListResponse,
    },
    auth::current_user::CurrentUser,
    errors::{Error, ErrorBody},
};

/// Grant a user access to a database (admin only)
#[utoipa::path(
    post,
    path = "/database-access/grant",
    tag = "database-access",
    request_body = DatabaseAccessRequest,
    responses(
        (status = 200, description = "Access granted (or already granted)", body = DatabaseAccessResponse),
        (status = 400, description = "Invalid database name", body = ErrorBody),
        (status = 403, description = "Administrator privileges required", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    security(("session_cookie" = []), ("bearer_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn grant(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<DatabaseAccessRequest>,
) -> Result<Json<DatabaseAccessResponse>, Error> {
    state
        .gateway
        .grant_database_access(&current_user, request.user_id, &request.db_name)
        .await?;
    Ok(Json(DatabaseAccessResponse {
        success: true,
        message: format!("Access to '{}' granted", request.db_name.trim()),
    }))
}

/// Revoke a user's access to a database (admin only). Revoking absent access succeeds.
#[utoipa::path(
    post,
    path = "/database-access/revoke",
    tag = "database-access",
    request_body = DatabaseAccessRequest,
    responses(
        (status = 200, description = "Access revoked", body = DatabaseAccessResponse),
        (status = 403, description = "Administrator privileges required", body = ErrorBody),
    ),
    security(("session_cookie" = []), ("bearer_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn revoke(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<DatabaseAccessRequest>,
) -> Result<Json<DatabaseAccessResponse>, Error> {
    state
        .gateway
        .revoke_database_access(&current_user, request.user_id, &request.db_name)
        .await?;
    Ok(Json(DatabaseAccessResponse {
        success: true,
        message: format!("Access to '{}' revoked", request.db_name.trim()),
    }))
}

/// List databases the caller (or, for admins, another user) may use
#[utoipa::path(
    get,
    path = "/database-access",
    tag = "database-access",
    params(AccessibleDatabasesQuery),
    responses(
        (status = 200, description = "Accessible databases", body = DatabaseListResponse),
        (status = 403, description = "Administrator privileges required for other users", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    security(("session_cookie" = []), ("bearer_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_accessible(
    State(state): State<AppState>,
    Query(query): Query<AccessibleDatabasesQuery>,
    current_user: CurrentUser,
) -> Result<Json<DatabaseListResponse>, Error> {
    let databases = state.gateway.list_accessible_databases(&current_user, query.user_id).await?;
    Ok(Json(databases.into()))
}

/// Check whether the caller may use a database
#[utoipa::path(
    get,
    path = "/database-access/check",
    tag = "database-access",
    params(CheckAccessQuery),
    responses(
        (status = 200, description = "Access decision", body = CheckAccessResponse),
    ),
    security(("session_cookie" = []), ("bearer_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn check(
    State(state): State<AppState>,
    Query(query): Query<CheckAccessQuery>,
    current_user: CurrentUser,
) -> Result<Json<CheckAccessResponse>, Error> {
    let allowed = state.gateway.check_database_access(&current_user, &query.db_name).await?;
    Ok(Json(CheckAccessResponse {
        db_name: query.db_name,
        allowed,
    }))
}

/// List every database in the catalog (admin only)
#[utoipa::path(
    get,
    path = "/databases",
    tag = "database-access",
    responses(
        (status = 200, description = "All known databases", body = DatabaseListResponse),
        (status = 403, description = "Administrator privileges required", body = ErrorBody),
    ),
    security(("session_cookie" = []), ("bearer_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_catalog(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<DatabaseListResponse>, Error> {
    let databases = state.gateway.list_catalog_databases(&current_user).await?;
    Ok(Json(databases.into()))
}
