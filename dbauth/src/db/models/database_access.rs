//! Database models for per-user database access grants.

use crate::types::{GrantId, UserId};
use chrono::{DateTime, Utc};

/// Database response for a grant row. `(user_id, db_name)` is unique; revocation clears
/// `is_active` rather than deleting the row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DatabaseAccessDBResponse {
    pub id: GrantId,
    pub user_id: UserId,
    pub db_name: String,
    pub granted_by: Option<UserId>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
