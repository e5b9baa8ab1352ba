use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;

use crate::{
    AppState,
    api::models::auth::{
        AuthSuccessResponse, ChangePasswordRequest, LoginRequest, LoginResponse, RefreshResponse, RegisterRequest, RegisterResponse,
        WhoAmIResponse, WithSessionCookie,
    },
    auth::{
        current_user::{CurrentUser, MaybeCredential, extract_credential},
        session::{ClientMetadata, IssuedSession},
    },
    config::SessionConfig,
    errors::{Error, ErrorBody},
};

/// Build the `Set-Cookie` value carrying the session id.
pub(crate) fn session_cookie(config: &SessionConfig, value: &str, max_age_secs: i64) -> String {
    let same_site = match config.cookie_same_site.to_ascii_lowercase().as_str() {
        "strict" => "Strict",
        "none" => "None",
        _ => "Lax",
    };
    // Browsers drop SameSite=None cookies that are not Secure
    let secure = if config.cookie_secure || same_site == "None" { "; Secure" } else { "" };

    format!(
        "{}={}; Path=/; HttpOnly; SameSite={}; Max-Age={}{}",
        config.cookie_name,
        value,
        same_site,
        max_age_secs.max(0),
        secure
    )
}

fn cookie_for(config: &SessionConfig, session: &IssuedSession) -> String {
    let max_age = (session.expires_at - Utc::now()).num_seconds();
    session_cookie(config, &session.session_id, max_age)
}

/// Register a new account
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "User registered", body = RegisterResponse),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 403, description = "Registration disabled", body = ErrorBody),
        (status = 409, description = "Username or email already taken", body = ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), Error> {
    let user = state.gateway.register(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            message: "Registration successful".to_string(),
            user,
        }),
    ))
}

/// Login with username (or email) and password
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    metadata: ClientMetadata,
    Json(request): Json<LoginRequest>,
) -> Result<WithSessionCookie<LoginResponse>, Error> {
    let outcome = state.gateway.login(request, metadata).await?;

    let cookie = outcome
        .session
        .as_ref()
        .map(|session| cookie_for(&state.config.auth.native.session, session));

    let body = LoginResponse {
        success: true,
        message: "Login successful".to_string(),
        user: outcome.user,
        session_id: outcome.session.as_ref().map(|s| s.session_id.clone()),
        token: outcome.session.as_ref().map(|s| s.token.clone()),
        expires_at: outcome.session.as_ref().map(|s| s.expires_at),
    };
    Ok(WithSessionCookie::ok(body, cookie))
}

/// Logout (end the current session, if any)
#[utoipa::path(
    post,
    path = "/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    MaybeCredential(credential): MaybeCredential,
) -> Result<WithSessionCookie<AuthSuccessResponse>, Error> {
    state.gateway.logout(credential).await?;

    let cookie = session_cookie(&state.config.auth.native.session, "", 0);
    Ok(WithSessionCookie::ok(AuthSuccessResponse::new("Logout successful"), Some(cookie)))
}

/// Get the current user, their permissions and accessible databases
#[utoipa::path(
    get,
    path = "/me",
    tag = "authentication",
    responses(
        (status = 200, description = "Current user", body = WhoAmIResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody),
    ),
    security(("session_cookie" = []), ("bearer_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn whoami(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<WhoAmIResponse>, Error> {
    Ok(Json(state.gateway.whoami(&current_user).await?))
}

/// Extend the current session
#[utoipa::path(
    post,
    path = "/refresh",
    tag = "authentication",
    responses(
        (status = 200, description = "Session refreshed", body = RefreshResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody),
    ),
    security(("session_cookie" = []), ("bearer_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Result<WithSessionCookie<RefreshResponse>, Error> {
    let credential = extract_credential(&headers, &state.config.auth.native.session.cookie_name);
    let session = match credential {
        Some(credential) => state.gateway.refresh_session(credential).await?,
        // Without a credential there is nothing to refresh, but the gateway decides whether
        // that is an error (mock mode always has an identity)
        None => {
            state.gateway.authenticate(None).await?;
            None
        }
    };

    let cookie = session
        .as_ref()
        .map(|session| cookie_for(&state.config.auth.native.session, session));
    let body = RefreshResponse {
        success: true,
        message: "Session refreshed".to_string(),
        session_id: session.as_ref().map(|s| s.session_id.clone()),
        token: session.as_ref().map(|s| s.token.clone()),
        expires_at: session.as_ref().map(|s| s.expires_at),
    };
    Ok(WithSessionCookie::ok(body, cookie))
}

/// Change password for the authenticated user. All of their sessions end.
#[utoipa::path(
    post,
    path = "/password-change",
    request_body = ChangePasswordRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Password changed successfully", body = AuthSuccessResponse),
        (status = 400, description = "New password rejected by policy", body = ErrorBody),
        (status = 401, description = "Current password is incorrect", body = ErrorBody),
    ),
    security(("session_cookie" = []), ("bearer_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<WithSessionCookie<AuthSuccessResponse>, Error> {
    state.gateway.change_password(&current_user, request).await?;

    // The caller's own session is gone too
    let cookie = session_cookie(&state.config.auth.native.session, "", 0);
    Ok(WithSessionCookie::ok(
        AuthSuccessResponse::new("Password changed successfully; please log in again"),
        Some(cookie),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::users::UserResponse,
        config::AuthMode,
        test_utils::{ADMIN_PASSWORD, create_test_config, test_server},
    };
    use axum::http::HeaderValue;
    use serde_json::json;

    fn cookie_pair(response: &axum_test::TestResponse) -> String {
        let header = response.headers().get("set-cookie").expect("set-cookie header").to_str().unwrap();
        header.split(';').next().unwrap().to_string()
    }

    #[test]
    fn test_session_cookie_format() {
        let config = SessionConfig::default();
        let cookie = session_cookie(&config, "abc", 2_592_000);
        assert_eq!(
            cookie,
            "dbgpt_auth_session=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=2592000"
        );

        let secure = SessionConfig {
            cookie_secure: true,
            cookie_same_site: "strict".to_string(),
            ..Default::default()
        };
        assert!(session_cookie(&secure, "abc", 10).ends_with("SameSite=Strict; Max-Age=10; Secure"));

        let none = SessionConfig {
            cookie_same_site: "none".to_string(),
            ..Default::default()
        };
        assert!(session_cookie(&none, "abc", 10).contains("; Secure"));
    }

    #[tokio::test]
    async fn test_register_success() {
        let server = test_server(create_test_config()).await;

        let response = server
            .post("/auth/register")
            .json(&json!({
                "username": "alice",
                "email": "alice@x.com",
                "password": "longpassword1",
                "full_name": "Alice"
            }))
            .await;

        response.assert_status(StatusCode::CREATED);
        let body: RegisterResponse = response.json();
        assert!(body.success);
        assert_eq!(body.user.username, "alice");
        assert_eq!(body.user.role_name, "user");
        assert_eq!(body.user.full_name.as_deref(), Some("Alice"));

        let raw: serde_json::Value = response.json();
        assert!(raw["user"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_register_duplicate_is_conflict() {
        let server = test_server(create_test_config()).await;
        let request = json!({"username": "alice", "email": "alice@x.com", "password": "longpassword1"});

        server.post("/auth/register").json(&request).await.assert_status(StatusCode::CREATED);

        let response = server.post("/auth/register").json(&request).await;
        response.assert_status(StatusCode::CONFLICT);
        let body: ErrorBody = response.json();
        assert!(!body.success);
        assert_eq!(body.message, "This username is already taken");
    }

    #[tokio::test]
    async fn test_register_weak_password() {
        let server = test_server(create_test_config()).await;
        let response = server
            .post("/auth/register")
            .json(&json!({"username": "alice", "email": "alice@x.com", "password": "short"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_sets_cookie_and_returns_token() {
        let server = test_server(create_test_config()).await;

        let response = server
            .post("/auth/login")
            .json(&json!({"username": "admin", "password": ADMIN_PASSWORD}))
            .await;
        response.assert_status_ok();

        let set_cookie = response.headers().get("set-cookie").unwrap().to_str().unwrap().to_string();
        assert!(set_cookie.starts_with("dbgpt_auth_session="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Path=/"));
        assert!(set_cookie.contains("Max-Age=259"));

        let body: LoginResponse = response.json();
        assert!(body.success);
        assert!(body.user.is_superuser);
        assert_eq!(cookie_pair(&response), format!("dbgpt_auth_session={}", body.session_id.unwrap()));
        assert!(body.token.is_some());
        assert!(body.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let server = test_server(create_test_config()).await;

        let response = server
            .post("/auth/login")
            .json(&json!({"username": "admin", "password": "definitely-wrong"}))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert!(response.headers().get("set-cookie").is_none());

        let body: ErrorBody = response.json();
        assert_eq!(body.message, "Invalid username or password");
    }

    #[tokio::test]
    async fn test_whoami_with_cookie_and_bearer() {
        let server = test_server(create_test_config()).await;
        let login = server
            .post("/auth/login")
            .json(&json!({"username": "admin", "password": ADMIN_PASSWORD}))
            .await;
        let cookie = cookie_pair(&login);
        let body: LoginResponse = login.json();

        let by_cookie = server
            .get("/auth/me")
            .add_header("cookie", HeaderValue::from_str(&cookie).unwrap())
            .await;
        by_cookie.assert_status_ok();
        let me: WhoAmIResponse = by_cookie.json();
        assert_eq!(me.user.username, "admin");
        assert!(me.permissions.admin);
        assert_eq!(me.accessible_databases, vec!["hr", "sales_db"]);

        let by_bearer = server
            .get("/auth/me")
            .add_header("authorization", HeaderValue::from_str(&format!("Bearer {}", body.token.unwrap())).unwrap())
            .await;
        by_bearer.assert_status_ok();
    }

    #[tokio::test]
    async fn test_whoami_unauthenticated() {
        let server = test_server(create_test_config()).await;
        let response = server.get("/auth/me").await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let response = server
            .get("/auth/me")
            .add_header("cookie", HeaderValue::from_static("dbgpt_auth_session=bogus"))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_invalidates_session() {
        let server = test_server(create_test_config()).await;
        let login = server
            .post("/auth/login")
            .json(&json!({"username": "admin", "password": ADMIN_PASSWORD}))
            .await;
        let cookie = HeaderValue::from_str(&cookie_pair(&login)).unwrap();

        let logout = server.post("/auth/logout").add_header("cookie", cookie.clone()).await;
        logout.assert_status_ok();
        let cleared = logout.headers().get("set-cookie").unwrap().to_str().unwrap();
        assert!(cleared.contains("Max-Age=0"));

        server
            .get("/auth/me")
            .add_header("cookie", cookie.clone())
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        // Logging out again, or with nothing, still succeeds
        server.post("/auth/logout").add_header("cookie", cookie).await.assert_status_ok();
        server.post("/auth/logout").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let server = test_server(create_test_config()).await;
        let login = server
            .post("/auth/login")
            .json(&json!({"username": "admin", "password": ADMIN_PASSWORD}))
            .await;
        let original: LoginResponse = login.json();
        let old_token = original.token.unwrap();

        let response = server
            .post("/auth/refresh")
            .add_header("authorization", HeaderValue::from_str(&format!("Bearer {old_token}")).unwrap())
            .await;
        response.assert_status_ok();
        let refreshed: RefreshResponse = response.json();
        assert_eq!(refreshed.session_id, original.session_id);
        let new_token = refreshed.token.unwrap();

        server
            .get("/auth/me")
            .add_header("authorization", HeaderValue::from_str(&format!("Bearer {old_token}")).unwrap())
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        server
            .get("/auth/me")
            .add_header("authorization", HeaderValue::from_str(&format!("Bearer {new_token}")).unwrap())
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_refresh_without_credential() {
        let server = test_server(create_test_config()).await;
        server.post("/auth/refresh").await.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_change_password_flow() {
        let server = test_server(create_test_config()).await;
        server
            .post("/auth/register")
            .json(&json!({"username": "alice", "email": "alice@x.com", "password": "longpassword1"}))
            .await
            .assert_status(StatusCode::CREATED);
        let login = server
            .post("/auth/login")
            .json(&json!({"username": "alice", "password": "longpassword1"}))
            .await;
        let cookie = HeaderValue::from_str(&cookie_pair(&login)).unwrap();

        let response = server
            .post("/auth/password-change")
            .add_header("cookie", cookie.clone())
            .json(&json!({"current_password": "longpassword1", "new_password": "evenlongerpassword2"}))
            .await;
        response.assert_status_ok();

        server
            .get("/auth/me")
            .add_header("cookie", cookie)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        server
            .post("/auth/login")
            .json(&json!({"username": "alice", "password": "evenlongerpassword2"}))
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_mock_mode_needs_no_credentials() {
        let mut config = create_test_config();
        config.auth.mode = AuthMode::Mock;
        let server = test_server(config).await;

        let response = server.get("/auth/me").await;
        response.assert_status_ok();
        let me: WhoAmIResponse = response.json();
        assert_eq!(me.user.username, "dbgpt");
        assert!(me.user.is_superuser);
        assert!(me.permissions.chat && me.permissions.explore && me.permissions.construct && me.permissions.admin);

        let login = server
            .post("/auth/login")
            .json(&json!({"username": "whoever", "password": "whatever"}))
            .await;
        login.assert_status_ok();
        assert!(login.headers().get("set-cookie").is_none());
        let body: LoginResponse = login.json();
        assert!(body.session_id.is_none());
        let user: UserResponse = body.user;
        assert_eq!(user.username, "dbgpt");
    }
}
