//! Async seams between the catalog core and its collaborators

use async_trait::async_trait;

use crate::error::{CatalogError, MirrorError};
use crate::models::{CatalogItem, MirrorRecord, VariationRecord};

/// Anything that can serve catalog data: the REST client or a bridge.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Display name used in logs
    fn name(&self) -> &str;

    /// Whether the source can take calls right now.
    ///
    /// Checked once when an optional source is resolved at startup.
    async fn ready(&self) -> bool {
        true
    }

    async fn fetch_item(&self, id: i64) -> Result<CatalogItem, CatalogError>;

    /// Variations in the order the backend returns them
    async fn fetch_variations(&self, id: i64) -> Result<Vec<VariationRecord>, CatalogError>;

    async fn search_items(&self, term: &str) -> Result<Vec<CatalogItem>, CatalogError>;

    /// Every published item, optionally restricted to one category
    async fn list_items(&self, category: Option<&str>) -> Result<Vec<CatalogItem>, CatalogError>;
}

/// The durable mirror. The sync reconciler is its only writer.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn list_all(&self) -> Result<Vec<MirrorRecord>, MirrorError>;

    /// Inserts or replaces one record atomically
    async fn upsert(&self, record: &MirrorRecord) -> Result<(), MirrorError>;

    async fn count_all(&self) -> Result<i64, MirrorError>;

    /// Cheap liveness check; never writes
    async fn test_connection(&self) -> bool;
}
