use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::cache::{QueryCache, RefreshPolicy};
use crate::catalog::{CatalogConfig, RemoteCatalogClient};
use crate::config::AppConfig;
use crate::database::SqliteMirror;
use crate::error::{CatalogError, SyncError};
use crate::models::{
    CatalogItem, MirrorStatus, ResilienceSnapshot, StockBySize, SyncResult, fallback_catalog,
};
use crate::notify::{RefreshNotifier, RefreshSignal, Subscription};
use crate::resilience::ResilienceMonitor;
use crate::stock::{StockCache, resolve_stock_by_size};
use crate::sync::SyncReconciler;
use crate::traits::{CatalogSource, MirrorStore};

/// Cache key prefix of catalog listings
const CATALOG_PREFIX: &str = "catalog:";

/// Where a listing came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Remote,
    Bridge,
    Mirror,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct CatalogView {
    pub items: Vec<CatalogItem>,
    pub source: DataSource,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub stock_ttl: Duration,
    pub catalog_ttl: Duration,
    pub refresh_stale_after: Duration,
}

/// Everything a [`RentalCatalog`] is assembled from
pub struct Components {
    pub remote: Arc<dyn CatalogSource>,
    pub monitor: Arc<ResilienceMonitor>,
    pub mirror: Arc<dyn MirrorStore>,
    pub bridge: Bridge<dyn CatalogSource>,
    pub caches: CacheSettings,
    pub category: Option<String>,
}

#[derive(Clone)]
pub struct RentalCatalog {
    remote: Arc<dyn CatalogSource>,
    monitor: Arc<ResilienceMonitor>,
    bridge: Bridge<dyn CatalogSource>,
    reconciler: SyncReconciler,
    stock_cache: StockCache,
    catalog_cache: QueryCache<Vec<CatalogItem>>,
    notifier: RefreshNotifier,
    category: Option<String>,
    _subscriptions: Arc<Vec<Subscription>>,
}

impl RentalCatalog {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let monitor = Arc::new(ResilienceMonitor::new(config.breaker.clone()));
        let remote = RemoteCatalogClient::new(config.catalog.clone(), Arc::clone(&monitor))
            .context("failed to build catalog client")?;
        let mirror = SqliteMirror::connect(&config.mirror_url, 5)
            .await
            .context("failed to open durable mirror")?;

        let candidate = match &config.bridge_url {
            Some(url) => {
                let bridge_config = CatalogConfig {
                    name: "bridge".to_string(),
                    base_url: url.clone(),
                    ..config.catalog.clone()
                };
                let bridge_monitor = Arc::new(ResilienceMonitor::new(config.breaker.clone()));
                let client: Arc<dyn CatalogSource> =
                    Arc::new(RemoteCatalogClient::new(bridge_config, bridge_monitor)?);
                Some(client)
            }
            None => None,
        };
        let bridge = Bridge::resolve(candidate, config.bridge_wait, |client| async move {
            client.ready().await
        })
        .await;

        Ok(Self::from_components(Components {
            remote: Arc::new(remote),
            monitor,
            mirror: Arc::new(mirror),
            bridge,
            caches: CacheSettings {
                stock_ttl: config.stock_cache_ttl,
                catalog_ttl: config.catalog_cache_ttl,
                refresh_stale_after: config.refresh_stale_after,
            },
            category: config.category.clone(),
        }))
    }

    pub fn from_components(parts: Components) -> Self {
        let stock_cache = StockCache::new(parts.caches.stock_ttl);
        let catalog_cache = QueryCache::new(parts.caches.catalog_ttl);
        let notifier = RefreshNotifier::new();

        let policy = RefreshPolicy {
            stale_after: parts.caches.refresh_stale_after,
            prefixes: vec![StockCache::PREFIX.to_string(), CATALOG_PREFIX.to_string()],
        };
        let subscriptions = {
            let stock = stock_cache.clone();
            let stock_policy = policy.clone();
            let catalog = catalog_cache.clone();
            vec![
                notifier.subscribe(move |signal| {
                    stock.inner().apply_refresh(signal, &stock_policy);
                }),
                notifier.subscribe(move |signal| {
                    catalog.apply_refresh(signal, &policy);
                }),
            ]
        };

        Self {
            remote: parts.remote,
            monitor: parts.monitor,
            bridge: parts.bridge,
            reconciler: SyncReconciler::new(parts.mirror),
            stock_cache,
            catalog_cache,
            notifier,
            category: parts.category,
            _subscriptions: Arc::new(subscriptions),
        }
    }

    pub fn monitor(&self) -> &Arc<ResilienceMonitor> {
        &self.monitor
    }

    pub fn notifier(&self) -> &RefreshNotifier {
        &self.notifier
    }

    pub fn reconciler(&self) -> &SyncReconciler {
        &self.reconciler
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        self.monitor.snapshot()
    }

    pub async fn mirror_status(&self) -> MirrorStatus {
        self.reconciler.check_remote_status().await
    }

    fn listing_key(&self) -> String {
        format!("{CATALOG_PREFIX}{}", self.category.as_deref().unwrap_or("all"))
    }

    /// The catalog listing, degrading from remote to bridge, mirror and
    /// finally the built-in list.
    pub async fn items(&self) -> CatalogView {
        let key = self.listing_key();
        if let Some(items) = self.catalog_cache.get(&key) {
            return CatalogView {
                items,
                source: DataSource::Remote,
            };
        }

        let category = self.category.as_deref();
        let err = match self.remote.list_items(category).await {
            Ok(items) => {
                self.catalog_cache.insert(key, items.clone());
                return CatalogView {
                    items,
                    source: DataSource::Remote,
                };
            }
            Err(err) => err,
        };
        warn!("Catalog listing from {} failed: {}", self.remote.name(), err);

        let from_bridge = self
            .bridge
            .call_or_else(
                |bridge| async move { bridge.list_items(category).await.ok() },
                || async { None },
            )
            .await;
        if let Some(items) = from_bridge {
            info!("Serving {} items from bridge", items.len());
            return CatalogView {
                items,
                source: DataSource::Bridge,
            };
        }

        match self.reconciler.mirror().list_all().await {
            Ok(records) if !records.is_empty() => {
                info!("Serving {} items from mirror", records.len());
                CatalogView {
                    items: records.into_iter().map(|r| r.item).collect(),
                    source: DataSource::Mirror,
                }
            }
            Ok(_) => {
                warn!("Mirror is empty, serving built-in catalog");
                CatalogView {
                    items: fallback_catalog(),
                    source: DataSource::Fallback,
                }
            }
            Err(mirror_err) => {
                warn!("Mirror unavailable ({}), serving built-in catalog", mirror_err);
                CatalogView {
                    items: fallback_catalog(),
                    source: DataSource::Fallback,
                }
            }
        }
    }

    pub async fn search(&self, term: &str) -> Result<Vec<CatalogItem>, CatalogError> {
        self.remote.search_items(term).await
    }

    /// Reconciled stock for one item, cached for the stock TTL.
    pub async fn stock_by_size(&self, id: i64) -> Result<StockBySize, CatalogError> {
        if let Some(stock) = self.stock_cache.get(id) {
            return Ok(stock);
        }

        let item = self.remote.fetch_item(id).await?;
        let variations = self.remote.fetch_variations(id).await?;
        let stock = resolve_stock_by_size(&item, &variations);

        self.stock_cache.insert(id, stock.clone());
        Ok(stock)
    }

    /// Fetches the listing, mirrors it and tells subscribers the data changed.
    ///
    /// A partial run still notifies when at least one item was committed.
    pub async fn manual_sync(&self, source: &str) -> Result<SyncResult> {
        info!("Sync requested by '{}'", source);

        let items = self
            .remote
            .list_items(self.category.as_deref())
            .await
            .context("failed to fetch catalog for sync")?;

        match self.reconciler.sync_from_remote(&items).await {
            Ok(result) => {
                if result.inserted + result.updated > 0 {
                    self.notifier.notify(&RefreshSignal::new(source));
                }
                Ok(result)
            }
            Err(SyncError::Partial(failure)) => {
                if failure.succeeded > 0 {
                    self.notifier.notify(&RefreshSignal::new(source));
                }
                Err(SyncError::Partial(failure).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// For use once the user has fixed rejected credentials.
    pub async fn retry_after_credentials_fixed(&self) -> Result<SyncResult> {
        self.monitor.clear_errors();
        self.manual_sync("credentials-retry").await
    }
}
