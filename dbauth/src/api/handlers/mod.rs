//! HTTP request handlers, mounted under `/auth`.
//!
//! Handlers extract the caller ([`crate::auth::current_user::CurrentUser`]) and hand everything
//! else to the configured [`crate::gateway::Gateway`]. Errors convert to
//! `{success: false, message}` bodies through [`crate::errors::Error`].
//!
//! - [`auth`]: register, login, logout, whoami, refresh and password change
//! - [`users`]: user listing and activation (admin only)
//! - [`database_access`]: grants, revocations and database lists

pub mod auth;
pub mod database_access;
pub mod users;
