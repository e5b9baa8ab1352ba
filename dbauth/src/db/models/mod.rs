//! Database record models matching table schemas.
//!
//! Row structs derive `sqlx::FromRow` and are separate from the API models in
//! [`crate::api::models`], which never expose password hashes, salts or session tokens.
//!
//! - [`users`]: accounts and credentials
//! - [`roles`]: the two fixed roles and their capability flags
//! - [`sessions`]: login sessions
//! - [`database_access`]: per-user database grants

pub mod database_access;
pub mod roles;
pub mod sessions;
pub mod users;
