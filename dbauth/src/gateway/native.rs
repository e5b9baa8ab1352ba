//! Gateway backed by real accounts and server-side sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::{Gateway, LoginOutcome};
use crate::{
    api::models::{
        auth::{ChangePasswordRequest, LoginRequest, RegisterRequest, WhoAmIResponse},
        pagination::Pagination,
        users::{UserListResponse, UserResponse},
    },
    auth::{
        current_user::CurrentUser,
        database_access::DatabaseAccessRegistry,
        password::{self, HashParams, PasswordDigest},
        permissions::{RoleName, effective_permissions, require_admin, validate_role_permissions},
        session::{ClientMetadata, Credential, IssuedSession, SessionManager},
    },
    config::NativeAuthConfig,
    db::{
        errors::DbError,
        models::{
            roles::RoleDBResponse,
            users::{UserCreateDBRequest, UserDBResponse},
        },
        store::Store,
    },
    errors::{Error, Result, unique_violation_message},
    types::{Permission, RoleId, UserId, abbrev_uuid},
};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 128;
const EMAIL_MAX: usize = 255;
const FULL_NAME_MAX: usize = 255;
const AVATAR_URL_MAX: usize = 512;

const INVALID_CREDENTIALS: &str = "Invalid username or password";

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some(INVALID_CREDENTIALS.to_string()),
    }
}

/// Run CPU-bound password work off the async runtime.
async fn blocking<T, F>(operation: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| Error::Internal {
        operation: format!("spawn {operation} task: {e}"),
    })?
}

fn validate_username(username: &str) -> Result<()> {
    let length = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&length) {
        return Err(Error::invalid(
            "username",
            format!("must be between {USERNAME_MIN} and {USERNAME_MAX} characters"),
        ));
    }
    if !username.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.')) {
        return Err(Error::invalid(
            "username",
            "may only contain letters, digits, '_', '-' and '.'",
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    let malformed = || Error::invalid("email", "must be a valid email address");

    if email.chars().count() > EMAIL_MAX {
        return Err(Error::invalid("email", format!("must be no more than {EMAIL_MAX} characters")));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(malformed());
    }
    let (local, domain) = email.split_once('@').ok_or_else(malformed)?;
    if local.is_empty() || domain.contains('@') {
        return Err(malformed());
    }
    let valid_domain = domain.split('.').count() >= 2 && domain.split('.').all(|label| !label.is_empty());
    if !valid_domain {
        return Err(malformed());
    }
    Ok(())
}

fn validate_optional_length(field: &str, value: Option<&str>, max: usize) -> Result<()> {
    match value {
        Some(v) if v.chars().count() > max => Err(Error::invalid(field, format!("must be no more than {max} characters"))),
        _ => Ok(()),
    }
}

/// Empty optional strings are stored as absent
fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub struct NativeGateway {
    store: Arc<dyn Store>,
    sessions: SessionManager,
    registry: DatabaseAccessRegistry,
    config: NativeAuthConfig,
    hash_params: HashParams,
    /// Verified against when the username is unknown, so both paths cost one KDF run
    dummy_digest: PasswordDigest,
}

impl NativeGateway {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: SessionManager,
        registry: DatabaseAccessRegistry,
        config: NativeAuthConfig,
    ) -> Result<Self> {
        let hash_params = HashParams::from_config(&config.password);
        let dummy_digest = password::hash_password_with_params(&password::generate_random_password(), hash_params)?;
        Ok(Self {
            store,
            sessions,
            registry,
            config,
            hash_params,
            dummy_digest,
        })
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    async fn load_role(&self, role_id: RoleId) -> Result<RoleDBResponse> {
        let role = self.store.get_role(role_id).await?.ok_or_else(|| Error::Internal {
            operation: format!("load role {role_id}: role missing"),
        })?;
        validate_role_permissions(&role.name, role.permissions())?;
        Ok(role)
    }

    async fn user_response(&self, user: UserDBResponse) -> Result<UserResponse> {
        let role = self.load_role(user.role_id).await?;
        Ok(UserResponse::from_parts(user, &role))
    }

    async fn find_login_user(&self, identifier: &str) -> Result<Option<UserDBResponse>> {
        if let Some(user) = self.store.get_user_by_username(identifier).await? {
            return Ok(Some(user));
        }
        if identifier.contains('@') {
            return Ok(self.store.get_user_by_email(identifier).await?);
        }
        Ok(None)
    }

    async fn get_user_or_not_found(&self, user_id: UserId) -> Result<UserDBResponse> {
        self.store.get_user_by_id(user_id).await?.ok_or_else(|| Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        })
    }
}

#[async_trait]
impl Gateway for NativeGateway {
    #[instrument(skip_all, fields(username = %request.username), err)]
    async fn register(&self, request: RegisterRequest) -> Result<UserResponse> {
        if !self.config.allow_registration {
            return Err(Error::InsufficientPermissions {
                required: Permission::Administrator,
                resource: "user registration".to_string(),
            });
        }

        let username = request.username.trim().to_string();
        let email = request.email.trim().to_string();
        let full_name = non_empty(request.full_name);
        let avatar_url = non_empty(request.avatar_url);

        validate_username(&username)?;
        validate_email(&email)?;
        validate_optional_length("full_name", full_name.as_deref(), FULL_NAME_MAX)?;
        validate_optional_length("avatar_url", avatar_url.as_deref(), AVATAR_URL_MAX)?;
        password::check_policy(&request.password, &self.config.password)?;

        // Friendly early answer; the unique indexes are what actually guarantee uniqueness
        if self.store.get_user_by_username(&username).await?.is_some() {
            return Err(Error::Conflict {
                message: unique_violation_message(Some("users"), Some("users_username_lower_key")),
            });
        }
        if self.store.get_user_by_email(&email).await?.is_some() {
            return Err(Error::Conflict {
                message: unique_violation_message(Some("users"), Some("users_email_lower_key")),
            });
        }

        let role = self
            .store
            .get_role_by_name(RoleName::User.as_str())
            .await?
            .ok_or_else(|| Error::Internal {
                operation: "register user: default role missing, bootstrap has not run".to_string(),
            })?;

        let params = self.hash_params;
        let password = request.password;
        let digest = blocking("password hashing", move || password::hash_password_with_params(&password, params)).await?;

        let create = UserCreateDBRequest {
            username,
            email,
            password_hash: digest.hash,
            password_salt: digest.salt,
            full_name,
            avatar_url,
            role_id: role.id,
            is_superuser: false,
            is_active: true,
        };
        let user = self.store.create_user(&create).await.map_err(|e| match e {
            DbError::UniqueViolation { table, constraint, .. } => Error::Conflict {
                message: unique_violation_message(table.as_deref(), constraint.as_deref()),
            },
            other => Error::Database(other),
        })?;

        info!(user_id = %abbrev_uuid(&user.id), username = %user.username, "User registered");
        Ok(UserResponse::from_parts(user, &role))
    }

    #[instrument(skip_all, fields(username = %request.username), err(level = "debug"))]
    async fn login(&self, request: LoginRequest, metadata: ClientMetadata) -> Result<LoginOutcome> {
        let identifier = request.username.trim().to_string();
        let user = self.find_login_user(&identifier).await?;

        let (hash, salt) = match &user {
            Some(u) => (u.password_hash.clone(), u.password_salt.clone()),
            None => (self.dummy_digest.hash.clone(), self.dummy_digest.salt.clone()),
        };
        let password = request.password;
        let password_ok =
            blocking("password verification", move || Ok(password::verify_password(&password, &hash, &salt))).await?;

        let user = match user {
            Some(user) if password_ok && user.is_active => user,
            Some(user) if password_ok => {
                warn!(user_id = %abbrev_uuid(&user.id), "Login rejected: account is inactive");
                return Err(invalid_credentials());
            }
            _ => {
                warn!(username = %identifier, "Login rejected: invalid username or password");
                return Err(invalid_credentials());
            }
        };

        let session = self.sessions.issue(user.id, &user.username, &metadata).await?;

        let now = Utc::now();
        if let Err(e) = self.store.update_last_login(user.id, now).await {
            warn!(user_id = %abbrev_uuid(&user.id), error = %e, "Failed to record last login");
        }

        info!(user_id = %abbrev_uuid(&user.id), username = %user.username, "User logged in");
        let mut user = user;
        user.last_login = Some(now);
        Ok(LoginOutcome {
            user: self.user_response(user).await?,
            session: Some(session),
        })
    }

    #[instrument(skip_all, err)]
    async fn logout(&self, credential: Option<Credential>) -> Result<()> {
        let Some(credential) = credential else {
            debug!("Logout without credential");
            return Ok(());
        };
        if self.sessions.revoke_credential(&credential).await? {
            info!("User logged out");
        }
        Ok(())
    }

    async fn authenticate(&self, credential: Option<Credential>) -> Result<CurrentUser> {
        let credential = credential.ok_or(Error::Unauthenticated { message: None })?;
        let validated = self.sessions.validate(&credential).await?;
        let role = self.load_role(validated.user.role_id).await?;
        Ok(CurrentUser::from_parts(&validated.user, &role))
    }

    #[instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id)), err)]
    async fn whoami(&self, user: &CurrentUser) -> Result<WhoAmIResponse> {
        let row = self
            .store
            .get_user_by_id(user.id)
            .await?
            .ok_or(Error::Unauthenticated { message: None })?;

        Ok(WhoAmIResponse {
            user: self.user_response(row).await?,
            permissions: effective_permissions(user),
            accessible_databases: self.registry.list_accessible(user).await?,
        })
    }

    #[instrument(skip_all, fields(requester = %requester.username), err)]
    async fn list_users(&self, requester: &CurrentUser, pagination: Pagination) -> Result<UserListResponse> {
        require_admin(requester, "user management")?;

        let (skip, limit) = pagination.params();
        let users = self.store.list_users(skip, limit).await?;
        let total = self.store.count_users().await?;

        let roles: HashMap<RoleId, RoleDBResponse> = self.store.list_roles().await?.into_iter().map(|r| (r.id, r)).collect();
        let users = users
            .into_iter()
            .map(|user| {
                let role = roles.get(&user.role_id).ok_or_else(|| Error::Internal {
                    operation: format!("list users: role {} missing", user.role_id),
                })?;
                Ok(UserResponse::from_parts(user, role))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(UserListResponse { users, total })
    }

    async fn grant_database_access(&self, requester: &CurrentUser, user_id: UserId, db_name: &str) -> Result<()> {
        self.registry.grant(requester, user_id, db_name).await
    }

    async fn revoke_database_access(&self, requester: &CurrentUser, user_id: UserId, db_name: &str) -> Result<()> {
        self.registry.revoke(requester, user_id, db_name).await
    }

    async fn list_accessible_databases(&self, requester: &CurrentUser, user_id: Option<UserId>) -> Result<Vec<String>> {
        match user_id {
            None => self.registry.list_accessible(requester).await,
            Some(id) if id == requester.id => self.registry.list_accessible(requester).await,
            Some(id) => {
                require_admin(requester, "other users' database access")?;
                let target = self.get_user_or_not_found(id).await?;
                self.registry.list_accessible_for(target.id, target.is_superuser).await
            }
        }
    }

    async fn check_database_access(&self, user: &CurrentUser, db_name: &str) -> Result<bool> {
        self.registry.check_access(user, db_name).await
    }

    async fn list_catalog_databases(&self, requester: &CurrentUser) -> Result<Vec<String>> {
        self.registry.list_catalog(requester).await
    }

    async fn refresh_session(&self, credential: Credential) -> Result<Option<IssuedSession>> {
        Ok(Some(self.sessions.refresh(&credential).await?))
    }

    #[instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id)), err)]
    async fn change_password(&self, user: &CurrentUser, request: ChangePasswordRequest) -> Result<()> {
        let row = self
            .store
            .get_user_by_id(user.id)
            .await?
            .ok_or(Error::Unauthenticated { message: None })?;

        let (hash, salt) = (row.password_hash, row.password_salt);
        let current = request.current_password;
        let current_ok =
            blocking("password verification", move || Ok(password::verify_password(&current, &hash, &salt))).await?;
        if !current_ok {
            warn!(user_id = %abbrev_uuid(&user.id), "Password change rejected: current password is incorrect");
            return Err(Error::Unauthenticated {
                message: Some("Current password is incorrect".to_string()),
            });
        }

        password::check_policy(&request.new_password, &self.config.password)?;

        let params = self.hash_params;
        let new_password = request.new_password;
        let digest = blocking("password hashing", move || password::hash_password_with_params(&new_password, params)).await?;
        self.store.update_password(user.id, &digest.hash, &digest.salt).await?;

        let revoked = self.sessions.revoke_all_for_user(user.id).await?;
        info!(user_id = %abbrev_uuid(&user.id), revoked, "Password changed");
        Ok(())
    }

    #[instrument(skip_all, fields(requester = %requester.username, user_id = %abbrev_uuid(&user_id), is_active), err)]
    async fn set_user_active(&self, requester: &CurrentUser, user_id: UserId, is_active: bool) -> Result<UserResponse> {
        require_admin(requester, "user management")?;
        if !is_active && user_id == requester.id {
            return Err(Error::invalid("is_active", "you cannot deactivate your own account"));
        }

        let user = self.store.set_user_active(user_id, is_active).await.map_err(|e| match e {
            DbError::NotFound => Error::NotFound {
                resource: "User".to_string(),
                id: user_id.to_string(),
            },
            other => Error::Database(other),
        })?;

        if !is_active {
            self.sessions.revoke_all_for_user(user_id).await?;
        }
        info!(
            requester = %requester.username,
            user_id = %abbrev_uuid(&user_id),
            is_active,
            "User active flag changed"
        );
        self.user_response(user).await
    }
}
