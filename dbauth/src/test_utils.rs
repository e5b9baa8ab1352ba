//! Shared fixtures for unit and HTTP tests.

use std::sync::Arc;

use axum_test::TestServer;
use uuid::Uuid;

use crate::{
    Application,
    auth::{
        current_user::CurrentUser,
        database_access::DatabaseAccessRegistry,
        password::{self, HashParams},
        permissions::{Permissions, RoleName},
        session::{SessionKeys, SessionManager},
    },
    catalog::StaticCatalog,
    config::{Config, DatabaseConfig},
    db::{
        models::{
            roles::RoleCreateDBRequest,
            users::{UserCreateDBRequest, UserDBResponse},
        },
        store::{InMemoryStore, Store},
    },
    gateway::NativeGateway,
    types::UserId,
};

/// Password of the bootstrap `admin` account in [`create_test_config`].
pub const ADMIN_PASSWORD: &str = "admin-test-password";

/// Password given to every user made by [`create_test_user`].
pub const TEST_USER_PASSWORD: &str = "password123";

/// Keeps hashing fast; production uses the default 100k iterations.
const TEST_PBKDF2_ITERATIONS: u32 = 1_000;

pub fn create_test_config() -> Config {
    let mut config = Config {
        database: DatabaseConfig::InMemory,
        secret_key: Some("test-secret-key-for-session-signing".to_string()),
        ..Default::default()
    };
    config.admin.password = Some(ADMIN_PASSWORD.to_string());
    config.catalog.databases = vec!["sales_db".to_string(), "hr".to_string()];
    config.auth.native.password.pbkdf2_iterations = TEST_PBKDF2_ITERATIONS;
    config
}

/// An identity that exists only in memory, for permission checks that never touch storage.
pub fn current_user_with_role(role: RoleName, is_superuser: bool) -> CurrentUser {
    let id = Uuid::new_v4();
    let username = format!("{}-{}", role.as_str(), &id.simple().to_string()[..8]);
    CurrentUser {
        id,
        email: format!("{username}@example.com"),
        username,
        full_name: None,
        avatar_url: None,
        is_superuser,
        role: role.as_str().to_string(),
        permissions: Permissions::for_role(role),
    }
}

/// An in-memory store with both roles seeded.
pub async fn test_store() -> Arc<dyn Store> {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    for role in RoleName::ALL {
        store
            .ensure_role(&RoleCreateDBRequest::fixed(role))
            .await
            .expect("Failed to seed role");
    }
    store
}

/// Create an active user with the `user` role and [`TEST_USER_PASSWORD`].
pub async fn create_test_user(store: &Arc<dyn Store>, username: &str, is_superuser: bool) -> UserDBResponse {
    let role = store
        .get_role_by_name(RoleName::User.as_str())
        .await
        .expect("Failed to load role")
        .expect("user role not seeded; use test_store()");
    let digest = password::hash_password_with_params(
        TEST_USER_PASSWORD,
        HashParams::Pbkdf2Sha256 {
            iterations: TEST_PBKDF2_ITERATIONS,
        },
    )
    .expect("Failed to hash password");

    store
        .create_user(&UserCreateDBRequest {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: digest.hash,
            password_salt: digest.salt,
            full_name: None,
            avatar_url: None,
            role_id: role.id,
            is_superuser,
            is_active: true,
        })
        .await
        .expect("Failed to create test user")
}

/// Load a stored user as the request identity handlers would see.
pub async fn current_user_for(store: &Arc<dyn Store>, id: UserId) -> CurrentUser {
    let user = store.get_user_by_id(id).await.unwrap().expect("user exists");
    let role = store.get_role(user.role_id).await.unwrap().expect("role exists");
    CurrentUser::from_parts(&user, &role)
}

pub fn test_gateway(store: Arc<dyn Store>, config: &Config) -> NativeGateway {
    let keys = SessionKeys::from_secret(
        config.secret_key.as_deref().expect("test config has a secret"),
        config.auth.security.jwt_algorithm,
    )
    .unwrap();
    let sessions = SessionManager::new(store.clone(), keys, config.auth.native.session.timeout).unwrap();
    let catalog = Arc::new(StaticCatalog::new(config.catalog.databases.iter().cloned()));
    let registry = DatabaseAccessRegistry::new(store.clone(), catalog);
    NativeGateway::new(store, sessions, registry, config.auth.native.clone()).unwrap()
}

/// The full router over a fresh in-memory store, with the admin account bootstrapped.
pub async fn test_server(config: Config) -> TestServer {
    let app = Application::new(config).await.expect("Failed to create application");
    let (server, _bg_services) = app.into_test_server();
    server
}

/// Log in and return the `name=value` cookie pair to send on later requests.
pub async fn login_cookie(server: &TestServer, username: &str, password: &str) -> String {
    let response = server
        .post("/auth/login")
        .json(&serde_json::json!({"username": username, "password": password}))
        .await;
    response.assert_status_ok();
    let header = response
        .headers()
        .get("set-cookie")
        .expect("login sets a cookie")
        .to_str()
        .unwrap();
    header.split(';').next().unwrap().to_string()
}
