//! API request/response models for database-access grants.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::types::UserId;

/// Grant or revoke one user's access to one database
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DatabaseAccessRequest {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub db_name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatabaseAccessResponse {
    pub success: bool,
    pub message: String,
}

/// Whose databases to list. Defaults to the caller; anyone else requires admin.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AccessibleDatabasesQuery {
    #[param(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatabaseListResponse {
    pub databases: Vec<String>,
    pub total: usize,
}

impl From<Vec<String>> for DatabaseListResponse {
    fn from(databases: Vec<String>) -> Self {
        Self {
            total: databases.len(),
            databases,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CheckAccessQuery {
    pub db_name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckAccessResponse {
    pub db_name: String,
    pub allowed: bool,
}
