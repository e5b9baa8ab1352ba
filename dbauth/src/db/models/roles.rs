//! Database models for roles.

use crate::auth::permissions::{Permissions, RoleName};
use crate::types::RoleId;
use chrono::{DateTime, Utc};

/// Database request for seeding a role
#[derive(Debug, Clone)]
pub struct RoleCreateDBRequest {
    pub name: RoleName,
    pub description: Option<String>,
    pub permissions: Permissions,
}

impl RoleCreateDBRequest {
    /// The seeded row for one of the fixed roles
    pub fn fixed(name: RoleName) -> Self {
        Self {
            name,
            description: Some(name.description().to_string()),
            permissions: Permissions::for_role(name),
        }
    }
}

/// Database response for a role. Permissions are stored as four boolean columns.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoleDBResponse {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub perm_chat: bool,
    pub perm_explore: bool,
    pub perm_construct: bool,
    pub perm_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoleDBResponse {
    pub fn permissions(&self) -> Permissions {
        Permissions {
            chat: self.perm_chat,
            explore: self.perm_explore,
            construct: self.perm_construct,
            admin: self.perm_admin,
        }
    }
}
