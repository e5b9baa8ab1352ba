//! Per-user access to named external databases.
//!
//! A non-superuser may use a database only while an active grant row names them and that
//! database. Superusers bypass the grant table entirely and see the whole catalog.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::{
    auth::{current_user::CurrentUser, permissions::require_admin},
    catalog::DatabaseCatalog,
    db::store::Store,
    errors::{Error, Result},
    types::{UserId, abbrev_uuid},
};

const RESOURCE: &str = "database access management";

/// Grant bookkeeping plus superuser resolution against the catalog.
#[derive(Clone)]
pub struct DatabaseAccessRegistry {
    store: Arc<dyn Store>,
    catalog: Arc<dyn DatabaseCatalog>,
}

fn normalize_db_name(db_name: &str) -> Result<&str> {
    let trimmed = db_name.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid("db_name", "must not be empty"));
    }
    Ok(trimmed)
}

impl DatabaseAccessRegistry {
    pub fn new(store: Arc<dyn Store>, catalog: Arc<dyn DatabaseCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Give `grantee_id` access to `db_name`. Granting an existing grant again is a no-op success.
    #[instrument(skip(self, granter), fields(granter = %granter.username, grantee = %abbrev_uuid(&grantee_id)), err)]
    pub async fn grant(&self, granter: &CurrentUser, grantee_id: UserId, db_name: &str) -> Result<()> {
        require_admin(granter, RESOURCE)?;
        let db_name = normalize_db_name(db_name)?;

        if self.store.get_user_by_id(grantee_id).await?.is_none() {
            return Err(Error::NotFound {
                resource: "User".to_string(),
                id: grantee_id.to_string(),
            });
        }

        self.store.upsert_grant(grantee_id, db_name, granter.id).await?;
        info!(
            granter = %granter.username,
            grantee = %abbrev_uuid(&grantee_id),
            db_name,
            "Granted database access"
        );
        Ok(())
    }

    /// Withdraw access. Revoking a grant that does not exist (or is already inactive) succeeds.
    #[instrument(skip(self, granter), fields(granter = %granter.username, grantee = %abbrev_uuid(&grantee_id)), err)]
    pub async fn revoke(&self, granter: &CurrentUser, grantee_id: UserId, db_name: &str) -> Result<()> {
        require_admin(granter, RESOURCE)?;
        let db_name = normalize_db_name(db_name)?;

        let changed = self.store.deactivate_grant(grantee_id, db_name).await?;
        info!(
            granter = %granter.username,
            grantee = %abbrev_uuid(&grantee_id),
            db_name,
            changed,
            "Revoked database access"
        );
        Ok(())
    }

    /// Databases this user may use, sorted.
    pub async fn list_accessible(&self, user: &CurrentUser) -> Result<Vec<String>> {
        self.list_accessible_for(user.id, user.is_superuser).await
    }

    /// Same as [`Self::list_accessible`], for a user identified by id and superuser flag.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_accessible_for(&self, user_id: UserId, is_superuser: bool) -> Result<Vec<String>> {
        if is_superuser {
            return self.catalog.list_databases().await;
        }

        let grants = self.store.list_active_grants(user_id).await?;
        Ok(grants.into_iter().map(|g| g.db_name).collect())
    }

    pub async fn check_access(&self, user: &CurrentUser, db_name: &str) -> Result<bool> {
        if user.is_superuser {
            return Ok(true);
        }
        let Ok(db_name) = normalize_db_name(db_name) else {
            return Ok(false);
        };
        Ok(self.store.has_active_grant(user.id, db_name).await?)
    }

    /// Every database known to the catalog. Admin only.
    pub async fn list_catalog(&self, requester: &CurrentUser) -> Result<Vec<String>> {
        require_admin(requester, RESOURCE)?;
        self.catalog.list_databases().await
    }
}
