//! HTTP API: handlers and request/response models.
//!
//! Every route lives under `/auth`:
//!
//! - **Sessions**: `/register`, `/login`, `/logout`, `/me`, `/refresh`, `/password-change`
//! - **Users**: `/users`, `/users/{id}/active`
//! - **Database access**: `/database-access/*`, `/databases`
//!
//! Documentation is served at `/auth/docs`, with the raw document at `/auth/openapi.json`.

pub mod handlers;
pub mod models;
