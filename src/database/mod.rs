use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::{debug, info};

use crate::error::MirrorError;
use crate::models::{CatalogItem, MirrorRecord, StockStatus};
use crate::traits::MirrorStore;

/// SQLite-backed durable mirror of the catalog
#[derive(Clone)]
pub struct SqliteMirror {
    pool: SqlitePool,
}

/// Filesystem path of a `sqlite:` URL, if it names a file.
fn database_path(db_url: &str) -> Option<&str> {
    let path = db_url.strip_prefix("sqlite:")?;
    let path = path.strip_prefix("//").unwrap_or(path);
    let path = path.split('?').next().unwrap_or(path);
    (!path.is_empty() && path != ":memory:").then_some(path)
}

impl SqliteMirror {
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, MirrorError> {
        if let Some(path) = database_path(db_url) {
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| MirrorError::Unavailable(e.to_string()))?;
            }

            // Create database file if it doesn't exist
            if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
                info!("Creating database file {}", path);
                Sqlite::create_database(db_url).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        Self::migrate(pool).await
    }

    /// A private in-memory mirror on a single long-lived connection.
    pub async fn in_memory() -> Result<Self, MirrorError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, MirrorError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    fn record_from_row(row: &SqliteRow) -> Result<MirrorRecord, MirrorError> {
        let source_data = row
            .try_get::<Option<String>, _>("source_data")?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;

        Ok(MirrorRecord {
            item: CatalogItem {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                price_per_day: row.try_get("price_per_day")?,
                available: row.try_get("available")?,
                stock_status: row
                    .try_get::<Option<String>, _>("stock_status")?
                    .as_deref()
                    .and_then(StockStatus::from_wire),
                category: row.try_get("category")?,
                source_data,
            },
            content_hash: row.try_get("content_hash")?,
            synced_at: row.try_get::<DateTime<Utc>, _>("synced_at")?,
        })
    }
}

#[async_trait]
impl MirrorStore for SqliteMirror {
    async fn list_all(&self) -> Result<Vec<MirrorRecord>, MirrorError> {
        let rows = sqlx::query(
            r"
            SELECT id, name, price_per_day, available, stock_status, category,
                   source_data, content_hash, synced_at
            FROM catalog_items
            ORDER BY id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn upsert(&self, record: &MirrorRecord) -> Result<(), MirrorError> {
        let item = &record.item;
        let source_data = item
            .source_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            INSERT INTO catalog_items
                (id, name, price_per_day, available, stock_status, category,
                 source_data, content_hash, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                price_per_day = excluded.price_per_day,
                available = excluded.available,
                stock_status = excluded.stock_status,
                category = excluded.category,
                source_data = excluded.source_data,
                content_hash = excluded.content_hash,
                synced_at = excluded.synced_at
            ",
        )
        .bind(item.id)
        .bind(&item.name)
        .bind(item.price_per_day)
        .bind(item.available)
        .bind(item.stock_status.map(StockStatus::as_str))
        .bind(&item.category)
        .bind(source_data)
        .bind(&record.content_hash)
        .bind(record.synced_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!("Upserted item {} into mirror", item.id);
        Ok(())
    }

    async fn count_all(&self) -> Result<i64, MirrorError> {
        let count = sqlx::query("SELECT COUNT(*) AS total FROM catalog_items")
            .fetch_one(&self.pool)
            .await?
            .try_get::<i64, _>("total")?;
        Ok(count)
    }

    async fn test_connection(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bike(id: i64, name: &str) -> CatalogItem {
        CatalogItem {
            id,
            name: name.to_string(),
            price_per_day: 19.9,
            available: 3,
            stock_status: None,
            category: "city".to_string(),
            source_data: Some(json!({"id": id, "type": "simple"})),
        }
    }

    #[test]
    fn file_urls_resolve_to_paths() {
        assert_eq!(database_path("sqlite:database/catalog.db"), Some("database/catalog.db"));
        assert_eq!(database_path("sqlite://data.db?mode=rwc"), Some("data.db"));
        assert_eq!(database_path("sqlite::memory:"), None);
        assert_eq!(database_path("postgres://x"), None);
    }

    #[tokio::test]
    async fn upsert_inserts_then_replaces() {
        let mirror = SqliteMirror::in_memory().await.unwrap();
        assert!(mirror.test_connection().await);

        mirror.upsert(&MirrorRecord::new(bike(1, "City"))).await.unwrap();
        mirror.upsert(&MirrorRecord::new(bike(2, "Folding"))).await.unwrap();
        mirror.upsert(&MirrorRecord::new(bike(1, "City Deluxe"))).await.unwrap();

        assert_eq!(mirror.count_all().await.unwrap(), 2);
        let records = mirror.list_all().await.unwrap();
        assert_eq!(records[0].item, bike(1, "City Deluxe"));
        assert_eq!(records[0].content_hash, MirrorRecord::new(bike(1, "City Deluxe")).content_hash);
        assert_eq!(records[1].item.name, "Folding");
    }

    #[tokio::test]
    async fn stock_status_survives_the_mirror() {
        let mirror = SqliteMirror::in_memory().await.unwrap();
        let mut item = bike(5, "Cargo");
        item.stock_status = Some(StockStatus::OnBackorder);

        mirror.upsert(&MirrorRecord::new(item.clone())).await.unwrap();

        let records = mirror.list_all().await.unwrap();
        assert_eq!(records[0].item, item);
    }
}
