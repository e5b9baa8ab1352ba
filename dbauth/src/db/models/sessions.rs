//! Database models for login sessions.

use crate::types::{SessionRowId, UserId};
use chrono::{DateTime, Utc};

/// Database request for persisting a freshly issued session
#[derive(Debug, Clone)]
pub struct SessionCreateDBRequest {
    pub session_id: String,
    pub user_id: UserId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Database response for a session
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionDBResponse {
    pub id: SessionRowId,
    pub session_id: String,
    pub user_id: UserId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionDBResponse {
    /// Active and not yet expired. A session is rejected at exactly `expires_at`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }
}
