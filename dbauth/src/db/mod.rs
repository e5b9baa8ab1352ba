//! Persistence for users, roles, sessions and database grants.
//!
//! ```text
//! ┌──────────────────┐
//! │ auth / gateway   │  (business rules)
//! └────────┬─────────┘
//!          ↓
//! ┌──────────────────┐
//! │ store::Store     │  (trait; InMemoryStore or PostgresStore)
//! └────────┬─────────┘
//!          ↓
//! ┌──────────────────┐
//! │ models           │  (row structs)
//! └──────────────────┘
//! ```
//!
//! - [`store`]: the storage traits and both backends
//! - [`models`]: row structs and create requests
//! - [`errors`]: [`DbError`](errors::DbError), the storage error taxonomy
//!
//! PostgreSQL migrations live in `migrations/` and are run by [`crate::migrator`] at startup.

pub mod errors;
pub mod models;
pub mod store;
