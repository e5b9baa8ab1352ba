//! OpenAPI documentation for the `/auth` API.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{
    api::{self, models},
    auth::permissions::Permissions,
    errors::ErrorBody,
};

/// Session cookie and bearer token schemes.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "session_cookie".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "dbgpt_auth_session",
                    "Session id set by `POST /auth/login`.",
                ))),
            );
            components.security_schemes.insert(
                "bearer_token".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Session token returned by `POST /auth/login`:\n\n\
                            ```\nAuthorization: Bearer <token>\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "dbauth", description = "Authentication, sessions and database-access grants"),
    servers((url = "/auth")),
    paths(
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::auth::whoami,
        api::handlers::auth::refresh,
        api::handlers::auth::change_password,
        api::handlers::users::list_users,
        api::handlers::users::set_user_active,
        api::handlers::database_access::grant,
        api::handlers::database_access::revoke,
        api::handlers::database_access::list_accessible,
        api::handlers::database_access::check,
        api::handlers::database_access::list_catalog,
    ),
    components(schemas(
        models::auth::RegisterRequest,
        models::auth::RegisterResponse,
        models::auth::LoginRequest,
        models::auth::LoginResponse,
        models::auth::RefreshResponse,
        models::auth::AuthSuccessResponse,
        models::auth::WhoAmIResponse,
        models::auth::ChangePasswordRequest,
        models::users::UserResponse,
        models::users::UserListResponse,
        models::users::SetUserActiveRequest,
        models::users::SetUserActiveResponse,
        models::database_access::DatabaseAccessRequest,
        models::database_access::DatabaseAccessResponse,
        models::database_access::DatabaseListResponse,
        models::database_access::CheckAccessResponse,
        Permissions,
        ErrorBody,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "authentication", description = "Registration, login and sessions"),
        (name = "users", description = "User administration"),
        (name = "database-access", description = "Per-user database grants"),
    )
)]
pub struct ApiDoc;
