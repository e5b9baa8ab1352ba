//! Role-based permission evaluation.
//!
//! Permissions are a fixed four-flag record per role:
//!
//! | role  | chat | explore | construct | admin |
//! |-------|------|---------|-----------|-------|
//! | user  | yes  | yes     | no        | no    |
//! | admin | yes  | yes     | yes       | yes   |
//!
//! The superuser flag lives on the user, not the role. It does not change
//! [`effective_permissions`]; it only matters at admin-gated call sites through [`is_admin`] and
//! for database-access resolution.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tracing::warn;
use utoipa::ToSchema;

use crate::{
    auth::current_user::CurrentUser,
    errors::Error,
    types::{Capability, Permission},
};

/// The capability flags granted by a role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Permissions {
    pub chat: bool,
    pub explore: bool,
    pub construct: bool,
    pub admin: bool,
}

impl Permissions {
    /// Every flag set.
    pub const ALL: Permissions = Permissions {
        chat: true,
        explore: true,
        construct: true,
        admin: true,
    };

    /// The matrix row for a fixed role.
    pub const fn for_role(role: RoleName) -> Self {
        match role {
            RoleName::User => Permissions {
                chat: true,
                explore: true,
                construct: false,
                admin: false,
            },
            RoleName::Admin => Permissions::ALL,
        }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::Chat => self.chat,
            Capability::Explore => self.explore,
            Capability::Construct => self.construct,
            Capability::Admin => self.admin,
        }
    }
}

/// The two roles that exist. New registrations get [`RoleName::User`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    User,
    Admin,
}

impl RoleName {
    pub const ALL: [RoleName; 2] = [RoleName::User, RoleName::Admin];

    pub const fn as_str(&self) -> &'static str {
        match self {
            RoleName::User => "user",
            RoleName::Admin => "admin",
        }
    }

    pub const fn description(&self) -> &'static str {
        match self {
            RoleName::User => "Regular user: chat and data exploration",
            RoleName::Admin => "Administrator: all capabilities including user and database-access management",
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(RoleName::User),
            "admin" => Ok(RoleName::Admin),
            other => Err(Error::invalid("role", format!("unknown role '{other}'"))),
        }
    }
}

/// Check that a role row carries exactly the fixed matrix entry for its name.
///
/// Roles read back from storage go through this so a hand-edited row cannot widen a role.
pub fn validate_role_permissions(name: &str, permissions: Permissions) -> Result<RoleName, Error> {
    let role: RoleName = name.parse()?;
    if permissions != Permissions::for_role(role) {
        return Err(Error::Internal {
            operation: format!("load role '{role}': stored permissions {permissions:?} differ from the fixed matrix"),
        });
    }
    Ok(role)
}

/// The capabilities the user's role grants. The superuser flag does not alter the result.
pub fn effective_permissions(user: &CurrentUser) -> Permissions {
    user.permissions
}

pub fn has_capability(user: &CurrentUser, capability: Capability) -> bool {
    user.permissions.allows(capability)
}

/// Fail with `InsufficientPermissions` unless the user's role grants `capability`.
pub fn require_capability(user: &CurrentUser, capability: Capability) -> Result<(), Error> {
    if has_capability(user, capability) {
        return Ok(());
    }
    warn!(user = %user.username, %capability, "Capability check denied");
    Err(Error::InsufficientPermissions {
        required: Permission::Capability(capability),
        resource: format!("{capability} features"),
    })
}

/// Superuser, or a role with the admin flag. This is the check for every admin-gated operation.
pub fn is_admin(user: &CurrentUser) -> bool {
    user.is_superuser || user.permissions.admin
}

/// Fail with `InsufficientPermissions` unless [`is_admin`] holds.
pub fn require_admin(user: &CurrentUser, resource: &str) -> Result<(), Error> {
    if is_admin(user) {
        return Ok(());
    }
    warn!(user = %user.username, resource, "Administrator check denied");
    Err(Error::InsufficientPermissions {
        required: Permission::Administrator,
        resource: resource.to_string(),
    })
}
