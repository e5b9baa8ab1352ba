//! The set of databases known to the application.
//!
//! Database-access grants name databases by their catalog name. The catalog itself belongs to
//! whatever component manages data sources, so it is consumed through [`DatabaseCatalog`].

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::errors::Result;

/// Source of registered database names.
#[async_trait]
pub trait DatabaseCatalog: Send + Sync {
    /// Every registered database name, sorted and without duplicates.
    async fn list_databases(&self) -> Result<Vec<String>>;
}

/// A catalog fixed at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    databases: Vec<String>,
}

impl StaticCatalog {
    pub fn new<I, S>(databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let databases: BTreeSet<String> = databases
            .into_iter()
            .map(Into::into)
            .map(|name: String| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        Self {
            databases: databases.into_iter().collect(),
        }
    }
}

#[async_trait]
impl DatabaseCatalog for StaticCatalog {
    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.databases.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_catalog_sorted_and_deduplicated() {
        let catalog = StaticCatalog::new(["sales", "inventory", " sales ", "", "hr"]);
        assert_eq!(catalog.list_databases().await.unwrap(), vec!["hr", "inventory", "sales"]);
    }

    #[tokio::test]
    async fn test_empty_catalog() {
        let catalog = StaticCatalog::default();
        assert!(catalog.list_databases().await.unwrap().is_empty());
    }
}
