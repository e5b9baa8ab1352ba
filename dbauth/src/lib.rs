//! # dbauth: authentication and database-access authorization
//!
//! `dbauth` is the auth core of a multi-user data application. It owns user accounts, the two
//! fixed roles (`user` and `admin`), signed sessions, and per-user grants on named databases.
//! Everything else in the application asks it one of three questions: *who is calling*, *may
//! they do this*, and *which databases can they see*.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (/auth/*)          api::handlers
//!        │
//!        ↓
//!   Gateway trait  ───────  NativeGateway  │  MockGateway
//!        │                      │
//!        ↓                      ↓
//!   SessionManager   DatabaseAccessRegistry   password   permissions
//!        │                      │
//!        ↓                      ↓
//!   Store trait  ─────────  InMemoryStore  │  PostgresStore
//! ```
//!
//! The gateway is chosen once at startup from `auth.mode`:
//!
//! - **native**: username/password accounts, PBKDF2 (or Argon2id) password hashes, sessions
//!   carried in an HttpOnly cookie or an `Authorization: Bearer` token
//! - **mock**: every caller is the built-in `dbgpt` superuser and every database in the catalog
//!   is reachable. This is the single-user mode of older deployments.
//!
//! ## Startup
//!
//! [`Application::new`] opens the store (running migrations for PostgreSQL), seeds the two
//! roles and the administrative superuser, builds the gateway, and starts the expired-session
//! sweeper. [`Application::serve`] then binds the HTTP listener until the shutdown future
//! resolves.
//!
//! ```no_run
//! use dbauth::{Application, Config};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! Application::new(config).await?.serve(std::future::pending()).await
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod errors;
pub mod gateway;
mod openapi;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router, http,
    http::HeaderValue,
    routing::{get, patch, post},
};
use bon::Builder;
use chrono::Utc;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, error, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    auth::{
        database_access::DatabaseAccessRegistry,
        password::{self, HashParams},
        permissions::RoleName,
        session::{SessionKeys, SessionManager},
    },
    catalog::{DatabaseCatalog, StaticCatalog},
    config::{AuthMode, CorsOrigin, DatabaseConfig, PoolSettings},
    db::{
        models::{roles::RoleCreateDBRequest, users::UserCreateDBRequest},
        store::{InMemoryStore, PostgresStore, Store},
    },
    gateway::{Gateway, MockGateway, NativeGateway},
    openapi::ApiDoc,
};

pub use config::Config;
pub use types::UserId;

/// Password shipped in older deployment templates. Still accepted, but loudly.
const WELL_KNOWN_ADMIN_PASSWORD: &str = "dbgpt2024";

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .gateway(gateway)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub gateway: Arc<dyn Gateway>,
}

/// Get the dbauth database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

fn pool_options(settings: &PoolSettings) -> PgPoolOptions {
    let optional = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(optional(settings.idle_timeout_secs))
        .max_lifetime(optional(settings.max_lifetime_secs))
}

/// Open the configured store. For PostgreSQL this also runs pending migrations and returns the
/// pool so it can be closed on shutdown.
#[instrument(skip_all, err)]
async fn setup_store(config: &Config) -> anyhow::Result<(Arc<dyn Store>, Option<PgPool>)> {
    match &config.database {
        DatabaseConfig::InMemory => {
            warn!("Using in-memory storage; all users, sessions and grants are lost on restart");
            Ok((Arc::new(InMemoryStore::new()), None))
        }
        DatabaseConfig::Postgres { url, pool } => {
            info!("Connecting to PostgreSQL");
            let pool = pool_options(pool).connect(url).await?;
            migrator().run(&pool).await?;
            Ok((Arc::new(PostgresStore::new(pool.clone())), Some(pool)))
        }
    }
}

/// Seed the fixed roles and the administrative superuser.
///
/// Idempotent: roles are inserted only if missing, and an existing admin account is left as is
/// unless its stored hash no longer verifies the configured password, or is unusable and no
/// password is configured. In either case the hash is rewritten with the configured parameters.
#[instrument(skip_all, err)]
pub async fn bootstrap(store: &Arc<dyn Store>, config: &Config) -> anyhow::Result<UserId> {
    for name in RoleName::ALL {
        store.ensure_role(&RoleCreateDBRequest::fixed(name)).await?;
    }
    let admin_role = store
        .get_role_by_name(RoleName::Admin.as_str())
        .await?
        .ok_or_else(|| anyhow::anyhow!("admin role missing after seeding"))?;

    let admin = &config.admin;
    let params = HashParams::from_config(&config.auth.native.password);

    if admin.password.as_deref() == Some(WELL_KNOWN_ADMIN_PASSWORD) {
        warn!(
            username = %admin.username,
            "The admin password is the well-known default; change it before exposing this service"
        );
    }

    if let Some(existing) = store.get_user_by_username(&admin.username).await? {
        let replacement = match admin.password.clone() {
            Some(configured) => {
                let (stored_hash, stored_salt) = (existing.password_hash.clone(), existing.password_salt.clone());
                let candidate = configured.clone();
                let still_valid =
                    tokio::task::spawn_blocking(move || password::verify_password(&candidate, &stored_hash, &stored_salt)).await?;
                (!still_valid).then_some(configured)
            }
            None if !password::is_usable_hash(&existing.password_hash, &existing.password_salt) => {
                let generated = password::generate_random_password();
                warn!(
                    username = %admin.username,
                    password = %generated,
                    "Stored admin password hash is unusable and no password is configured; generated one. It will not be shown again"
                );
                Some(generated)
            }
            None => None,
        };

        if let Some(plaintext) = replacement {
            let digest = tokio::task::spawn_blocking(move || password::hash_password_with_params(&plaintext, params)).await??;
            store.update_password(existing.id, &digest.hash, &digest.salt).await?;
            info!(username = %admin.username, "Admin password hash regenerated");
        }
        debug!(username = %admin.username, "Admin user already exists");
        return Ok(existing.id);
    }

    let plaintext = match admin.password.clone() {
        Some(p) => p,
        None => {
            let generated = password::generate_random_password();
            warn!(
                username = %admin.username,
                password = %generated,
                "No admin password configured; generated one. It will not be shown again"
            );
            generated
        }
    };
    let digest = tokio::task::spawn_blocking(move || password::hash_password_with_params(&plaintext, params)).await??;

    let user = store
        .create_user(&UserCreateDBRequest {
            username: admin.username.clone(),
            email: admin.email.clone(),
            password_hash: digest.hash,
            password_salt: digest.salt,
            full_name: admin.full_name.clone(),
            avatar_url: None,
            role_id: admin_role.id,
            is_superuser: true,
            is_active: true,
        })
        .await?;
    info!(username = %user.username, "Created admin user");
    Ok(user.id)
}

/// The gateway selected by `auth.mode`, plus the session manager when sessions exist.
pub struct Gateways {
    pub gateway: Arc<dyn Gateway>,
    pub sessions: Option<SessionManager>,
}

pub fn build_gateway(store: Arc<dyn Store>, config: &Config) -> anyhow::Result<Gateways> {
    let catalog: Arc<dyn DatabaseCatalog> = Arc::new(StaticCatalog::new(config.catalog.databases.iter().cloned()));

    match config.auth.mode {
        AuthMode::Mock => {
            warn!("Authentication is in mock mode; every request acts as the built-in superuser");
            Ok(Gateways {
                gateway: Arc::new(MockGateway::new(catalog)),
                sessions: None,
            })
        }
        AuthMode::Native => {
            let secret = config
                .secret_key
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("secret_key is required for native authentication"))?;
            let keys = SessionKeys::from_secret(secret, config.auth.security.jwt_algorithm)?;
            let native = &config.auth.native;
            let sessions = SessionManager::new(store.clone(), keys, native.session.timeout)?;
            let registry = DatabaseAccessRegistry::new(store.clone(), catalog);
            let gateway = NativeGateway::new(store, sessions.clone(), registry, native.clone())?;
            Ok(Gateways {
                gateway: Arc::new(gateway),
                sessions: Some(sessions),
            })
        }
    }
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.auth.security.cors;
    let origins = cors_config
        .allowed_origins
        .iter()
        .map(|origin| match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>(),
            // Url::as_str keeps a trailing slash browsers never send
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>(),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PATCH])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_credentials(cors_config.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the router: every endpoint under `/auth`, the OpenAPI document and its viewer, CORS,
/// and request tracing.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    use api::handlers::{auth, database_access, users};

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::whoami))
        .route("/refresh", post(auth::refresh))
        .route("/password-change", post(auth::change_password))
        .route("/users", get(users::list_users))
        .route("/users/{user_id}/active", patch(users::set_user_active))
        .route("/database-access", get(database_access::list_accessible))
        .route("/database-access/grant", post(database_access::grant))
        .route("/database-access/revoke", post(database_access::revoke))
        .route("/database-access/check", get(database_access::check))
        .route("/databases", get(database_access::list_catalog))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));

    let cors = create_cors_layer(&state.config)?;

    let router = Router::new()
        .nest("/auth", auth_routes)
        .merge(Scalar::with_url("/auth/docs", ApiDoc::openapi()))
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// Background tasks that run alongside the HTTP server.
///
/// Today that is the expired-session sweeper (native mode only). Dropping the struct cancels
/// the shutdown token through `drop_guard`; [`shutdown`](BackgroundServices::shutdown) also
/// waits for the tasks to finish.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    fn start(sessions: Option<SessionManager>, cleanup_interval: Duration) -> Self {
        let shutdown_token = CancellationToken::new();
        let mut background_tasks = Vec::new();

        if let Some(sessions) = sessions {
            let token = shutdown_token.clone();
            background_tasks.push(tokio::spawn(async move {
                run_session_cleanup(sessions, cleanup_interval, token).await;
            }));
        }

        Self {
            background_tasks,
            drop_guard: Some(shutdown_token.clone().drop_guard()),
            shutdown_token,
        }
    }

    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Periodically mark expired sessions inactive until cancelled.
async fn run_session_cleanup(sessions: SessionManager, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval = ?every, "Session cleanup started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Session cleanup stopped");
                return;
            }
            _ = interval.tick() => {
                match sessions.cleanup_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "Deactivated expired sessions"),
                    Err(e) => error!(error = %e, "Session cleanup failed"),
                }
            }
        }
    }
}

/// The assembled service.
///
/// 1. **Initialize**: [`Application::new`] opens storage, seeds roles and the admin account,
///    builds the gateway and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests
/// 3. **Shutdown**: when the shutdown future resolves, background tasks are stopped and the
///    database pool is closed
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting dbauth with configuration: {:#?}", config);

        let (store, pool) = setup_store(&config).await?;
        bootstrap(&store, &config).await?;

        let Gateways { gateway, sessions } = build_gateway(store, &config)?;
        let bg_services = BackgroundServices::start(sessions, config.auth.native.session.cleanup_interval);

        let app_state = AppState::builder().config(config.clone()).gateway(gateway).build();
        let router = build_router(app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "dbauth listening on http://{}, docs at http://localhost:{}/auth/docs",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
