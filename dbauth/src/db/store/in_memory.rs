//! In-memory storage implementation.
//!
//! All tables live behind one `parking_lot::RwLock`, so every mutation is a single critical
//! section and uniqueness checks cannot race with inserts. The lock is never held across an
//! `.await`. State is lost on restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{GrantStore, RoleStore, SessionStore, UserStore};
use crate::db::errors::{DbError, Result};
use crate::db::models::{
    database_access::DatabaseAccessDBResponse,
    roles::{RoleCreateDBRequest, RoleDBResponse},
    sessions::{SessionCreateDBRequest, SessionDBResponse},
    users::{UserCreateDBRequest, UserDBResponse},
};
use crate::types::{RoleId, UserId};

#[derive(Default)]
struct Tables {
    roles: HashMap<RoleId, RoleDBResponse>,
    users: HashMap<UserId, UserDBResponse>,
    sessions: HashMap<String, SessionDBResponse>,
    grants: HashMap<(UserId, String), DatabaseAccessDBResponse>,
}

/// In-memory implementation of [`Store`](super::Store).
///
/// # Example
/// ```ignore
/// let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
/// let role = store.ensure_role(&RoleCreateDBRequest::fixed(RoleName::User)).await?;
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleStore for InMemoryStore {
    async fn ensure_role(&self, request: &RoleCreateDBRequest) -> Result<RoleDBResponse> {
        let mut tables = self.tables.write();

        if let Some(existing) = tables.roles.values().find(|r| r.name == request.name.as_str()) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let role = RoleDBResponse {
            id: Uuid::new_v4(),
            name: request.name.as_str().to_string(),
            description: request.description.clone(),
            perm_chat: request.permissions.chat,
            perm_explore: request.permissions.explore,
            perm_construct: request.permissions.construct,
            perm_admin: request.permissions.admin,
            created_at: now,
            updated_at: now,
        };
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<RoleDBResponse>> {
        Ok(self.tables.read().roles.get(&id).cloned())
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<RoleDBResponse>> {
        Ok(self.tables.read().roles.values().find(|r| r.name == name).cloned())
    }

    async fn list_roles(&self) -> Result<Vec<RoleDBResponse>> {
        let mut roles: Vec<_> = self.tables.read().roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut tables = self.tables.write();

        let username = request.username.to_lowercase();
        let email = request.email.to_lowercase();
        for existing in tables.users.values() {
            if existing.username.to_lowercase() == username {
                return Err(DbError::unique("users", "users_username_lower_key"));
            }
            if existing.email.to_lowercase() == email {
                return Err(DbError::unique("users", "users_email_lower_key"));
            }
        }
        if !tables.roles.contains_key(&request.role_id) {
            return Err(DbError::foreign_key("users", "users_role_id_fkey"));
        }

        let now = Utc::now();
        let user = UserDBResponse {
            id: Uuid::new_v4(),
            username: request.username.clone(),
            email: request.email.clone(),
            password_hash: request.password_hash.clone(),
            password_salt: request.password_salt.clone(),
            full_name: request.full_name.clone(),
            avatar_url: request.avatar_url.clone(),
            is_active: request.is_active,
            is_superuser: request.is_superuser,
            role_id: request.role_id,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>> {
        let username = username.to_lowercase();
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|u| u.username.to_lowercase() == username)
            .cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let email = email.to_lowercase();
        Ok(self.tables.read().users.values().find(|u| u.email.to_lowercase() == email).cloned())
    }

    async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<UserDBResponse>> {
        let mut users: Vec<_> = self.tables.read().users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(users
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_users(&self) -> Result<i64> {
        Ok(self.tables.read().users.len() as i64)
    }

    async fn update_last_login(&self, id: UserId, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.write();
        let user = tables.users.get_mut(&id).ok_or(DbError::NotFound)?;
        user.last_login = Some(at);
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_password(&self, id: UserId, password_hash: &str, password_salt: &str) -> Result<()> {
        let mut tables = self.tables.write();
        let user = tables.users.get_mut(&id).ok_or(DbError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.password_salt = password_salt.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_user_active(&self, id: UserId, is_active: bool) -> Result<UserDBResponse> {
        let mut tables = self.tables.write();
        let user = tables.users.get_mut(&id).ok_or(DbError::NotFound)?;
        user.is_active = is_active;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self, request: &SessionCreateDBRequest) -> Result<SessionDBResponse> {
        let mut tables = self.tables.write();

        if tables.sessions.contains_key(&request.session_id) {
            return Err(DbError::unique("sessions", "sessions_session_id_key"));
        }
        if !tables.users.contains_key(&request.user_id) {
            return Err(DbError::foreign_key("sessions", "sessions_user_id_fkey"));
        }

        let now = Utc::now();
        let session = SessionDBResponse {
            id: Uuid::new_v4(),
            session_id: request.session_id.clone(),
            user_id: request.user_id,
            token: request.token.clone(),
            expires_at: request.expires_at,
            is_active: true,
            user_agent: request.user_agent.clone(),
            ip_address: request.ip_address.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.sessions.insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionDBResponse>> {
        Ok(self.tables.read().sessions.get(session_id).cloned())
    }

    async fn update_session_token(&self, session_id: &str, token: &str, expires_at: DateTime<Utc>) -> Result<SessionDBResponse> {
        let mut tables = self.tables.write();
        let session = tables
            .sessions
            .get_mut(session_id)
            .filter(|s| s.is_active)
            .ok_or(DbError::NotFound)?;
        session.token = token.to_string();
        session.expires_at = expires_at;
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn deactivate_session(&self, session_id: &str) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables.sessions.get_mut(session_id) {
            Some(session) if session.is_active => {
                session.is_active = false;
                session.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_user_sessions(&self, user_id: UserId) -> Result<u64> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        let mut changed = 0;
        for session in tables.sessions.values_mut().filter(|s| s.user_id == user_id && s.is_active) {
            session.is_active = false;
            session.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn deactivate_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write();
        let mut changed = 0;
        for session in tables.sessions.values_mut().filter(|s| s.is_active && s.expires_at <= now) {
            session.is_active = false;
            session.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }
}

#[async_trait]
impl GrantStore for InMemoryStore {
    async fn upsert_grant(&self, user_id: UserId, db_name: &str, granted_by: UserId) -> Result<DatabaseAccessDBResponse> {
        let mut tables = self.tables.write();

        if !tables.users.contains_key(&user_id) {
            return Err(DbError::foreign_key("user_db_access", "user_db_access_user_id_fkey"));
        }

        let now = Utc::now();
        let grant = tables
            .grants
            .entry((user_id, db_name.to_string()))
            .and_modify(|g| {
                g.is_active = true;
                g.granted_by = Some(granted_by);
                g.updated_at = now;
            })
            .or_insert_with(|| DatabaseAccessDBResponse {
                id: Uuid::new_v4(),
                user_id,
                db_name: db_name.to_string(),
                granted_by: Some(granted_by),
                is_active: true,
                created_at: now,
                updated_at: now,
            });
        Ok(grant.clone())
    }

    async fn deactivate_grant(&self, user_id: UserId, db_name: &str) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables.grants.get_mut(&(user_id, db_name.to_string())) {
            Some(grant) if grant.is_active => {
                grant.is_active = false;
                grant.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active_grants(&self, user_id: UserId) -> Result<Vec<DatabaseAccessDBResponse>> {
        let mut grants: Vec<_> = self
            .tables
            .read()
            .grants
            .values()
            .filter(|g| g.user_id == user_id && g.is_active)
            .cloned()
            .collect();
        grants.sort_by(|a, b| a.db_name.cmp(&b.db_name));
        Ok(grants)
    }

    async fn has_active_grant(&self, user_id: UserId, db_name: &str) -> Result<bool> {
        Ok(self
            .tables
            .read()
            .grants
            .get(&(user_id, db_name.to_string()))
            .is_some_and(|g| g.is_active))
    }
}
