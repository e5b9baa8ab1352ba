//! Common type definitions and permission system types.
//!
//! This module defines:
//! - Type aliases for entity IDs (UserId, RoleId, etc.)
//! - The capability flags a role can carry
//! - Authorization requirements used in permission errors
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier
//! - [`RoleId`]: Role identifier
//! - [`SessionRowId`]: Primary key of a persisted session row (distinct from the opaque session id)
//! - [`GrantId`]: Database-access grant identifier
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type RoleId = Uuid;
pub type SessionRowId = Uuid;
pub type GrantId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// The four product capabilities a role may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Use the conversational interface
    Chat,
    /// Browse and query data sources
    Explore,
    /// Build apps, flows and agents
    Construct,
    /// Administer users and database access
    Admin,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Chat => write!(f, "chat"),
            Capability::Explore => write!(f, "explore"),
            Capability::Construct => write!(f, "construct"),
            Capability::Admin => write!(f, "admin"),
        }
    }
}

// Authorization requirement reported back when a check fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// The caller's role must carry this capability
    Capability(Capability),
    /// The caller must be a superuser or hold a role with the admin flag
    Administrator,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Capability(capability) => write!(f, "{capability} capability"),
            Permission::Administrator => write!(f, "administrator privileges"),
        }
    }
}
