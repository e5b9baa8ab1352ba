//! API request and response data models.
//!
//! API models are distinct from database models: password material lives in
//! [`crate::db::models::users::UserDBResponse`] and never reaches a response type.
//!
//! - [`auth`]: login, registration, session and password payloads
//! - [`users`]: user profiles and admin user management
//! - [`database_access`]: grant/revoke requests and database lists
//! - [`pagination`]: `skip`/`limit` query parameters

pub mod auth;
pub mod database_access;
pub mod pagination;
pub mod users;
