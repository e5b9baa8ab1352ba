//! Authentication and authorization.
//!
//! # Authentication
//!
//! In native mode a caller proves who they are with a session created by `POST /auth/login`:
//!
//! - a browser sends the session id in an HttpOnly cookie (`dbgpt_auth_session` by default)
//! - any other client sends the signed session token as `Authorization: Bearer <token>`
//!
//! The cookie wins when both are present. Either way the session must be active, unexpired and
//! belong to an active user. In mock mode every caller is the built-in superuser.
//!
//! # Authorization
//!
//! - **Roles**: `user` and `admin`, each a fixed set of capability flags ([`permissions`])
//! - **Superuser**: a per-user flag that bypasses database grants and passes admin checks
//! - **Database grants**: per-user access to named databases ([`database_access`])
//!
//! # Modules
//!
//! - [`current_user`]: the [`CurrentUser`](current_user::CurrentUser) extractor and credential parsing
//! - [`database_access`]: grant, revoke and resolve database access
//! - [`password`]: PBKDF2/Argon2id password hashing and the password policy
//! - [`permissions`]: role capability flags and admin checks
//! - [`session`]: session issue, validation, refresh and revocation
//!
//! ```ignore
//! use dbauth::auth::current_user::CurrentUser;
//!
//! async fn handler(current_user: CurrentUser) -> String {
//!     format!("Hello, {}!", current_user.username)
//! }
//! ```

pub mod current_user;
pub mod database_access;
pub mod password;
pub mod permissions;
pub mod session;
