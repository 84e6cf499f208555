//! WooCommerce REST client for products, variations and search.
//!
//! Every attempt asks the shared [`ResilienceMonitor`] for admission first and
//! reports its outcome right after the awaited call, so an open circuit sheds
//! load without touching the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::CatalogError;
use crate::models::woo::{WooVariation, decode_product};
use crate::models::{CatalogItem, VariationRecord};
use crate::resilience::ResilienceMonitor;
use crate::resilience::backoff::RetryPolicy;
use crate::traits::CatalogSource;

/// Page size used for listings
const PER_PAGE: usize = 100;

/// Safety limit to prevent endless paging
const MAX_PAGES: u32 = 50;

/// Connection settings for one REST endpoint
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Display name for logs
    pub name: String,
    /// REST base, e.g. `https://shop.example/wp-json/wc/v3`
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            name: "woocommerce".to_string(),
            base_url: "http://localhost:8080/wp-json/wc/v3".to_string(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            timeout: Duration::from_millis(30_000),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct RemoteCatalogClient {
    client: Client,
    config: CatalogConfig,
    monitor: Arc<ResilienceMonitor>,
}

/// Pulls the backend's `message` field out of an error body.
fn error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| fallback.to_string())
}

fn has_category(item: &CatalogItem, slug: &str) -> bool {
    if item.category == slug {
        return true;
    }
    item.source_data
        .as_ref()
        .and_then(|raw| raw.get("categories"))
        .and_then(Value::as_array)
        .is_some_and(|cats| {
            cats.iter()
                .any(|c| c.get("slug").and_then(Value::as_str) == Some(slug))
        })
}

impl RemoteCatalogClient {
    pub fn new(
        config: CatalogConfig,
        monitor: Arc<ResilienceMonitor>,
    ) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .user_agent(concat!("rental-catalog/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            config,
            monitor,
        })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<ResilienceMonitor> {
        &self.monitor
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// One HTTP attempt bounded by the configured timeout. Dropping the
    /// request future on expiry aborts the connection.
    async fn send_once(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, CatalogError> {
        let request = async {
            let mut builder = self.client.get(self.url(path)).query(query);
            if !self.config.consumer_key.is_empty() {
                builder = builder.basic_auth(
                    &self.config.consumer_key,
                    Some(&self.config.consumer_secret),
                );
            }

            let response = builder.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let fallback = status.canonical_reason().unwrap_or("request failed");
                return Err(CatalogError::from_status(
                    status.as_u16(),
                    error_message(&body, fallback),
                ));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| CatalogError::Decode(e.to_string()))
        };

        match tokio::time::timeout(self.config.timeout, request).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CatalogError::Timeout(
                u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    /// GET with circuit admission, outcome reporting and retries.
    ///
    /// When the circuit opens between retries, the caller gets the last
    /// backend error rather than `CircuitOpen`.
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, CatalogError> {
        let mut attempt = 0;
        let mut last_err = None;
        loop {
            let permit = match self.monitor.try_acquire() {
                Ok(permit) => permit,
                Err(refused) => return Err(last_err.unwrap_or(refused)),
            };

            let trial = if permit.is_trial() { ", half-open trial" } else { "" };
            debug!("GET {} (attempt {}{})", path, attempt + 1, trial);
            let outcome = self.send_once(path, query).await;
            permit.record(&outcome);

            match outcome {
                Err(err) if err.is_transient() && attempt < self.config.retry.max_retries => {
                    let delay = self.config.retry.delay(attempt);
                    warn!("GET {} failed ({}), retrying in {:?}", path, err, delay);
                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn get_array(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>, CatalogError> {
        let value = self.get_json(path, query).await?;
        serde_json::from_value(value).map_err(|e| CatalogError::Decode(e.to_string()))
    }

    /// Follows `page` until a short page or the page limit.
    async fn get_paged(
        &self,
        path: &str,
        extra: &[(&str, String)],
    ) -> Result<Vec<Value>, CatalogError> {
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            let mut query = vec![
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            query.extend(extra.iter().cloned());

            let batch = self.get_array(path, &query).await?;
            let done = batch.len() < PER_PAGE;
            all.extend(batch);
            if done {
                break;
            }
        }
        Ok(all)
    }

    fn decode_products(values: Vec<Value>) -> Result<Vec<CatalogItem>, CatalogError> {
        values
            .into_iter()
            .map(|raw| decode_product(raw).map_err(|e| CatalogError::Decode(e.to_string())))
            .collect()
    }
}

#[async_trait]
impl CatalogSource for RemoteCatalogClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn ready(&self) -> bool {
        self.get_json("/products", &[("per_page", "1".to_string())])
            .await
            .is_ok()
    }

    async fn fetch_item(&self, id: i64) -> Result<CatalogItem, CatalogError> {
        let raw = self.get_json(&format!("/products/{id}"), &[]).await?;
        decode_product(raw).map_err(|e| CatalogError::Decode(e.to_string()))
    }

    async fn fetch_variations(&self, id: i64) -> Result<Vec<VariationRecord>, CatalogError> {
        let values = self.get_paged(&format!("/products/{id}/variations"), &[]).await?;
        let records = values
            .into_iter()
            .map(|raw| {
                serde_json::from_value::<WooVariation>(raw)
                    .map(|v| v.into_record(id))
                    .map_err(|e| CatalogError::Decode(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Item {} has {} variations", id, records.len());
        Ok(records)
    }

    async fn search_items(&self, term: &str) -> Result<Vec<CatalogItem>, CatalogError> {
        let path = format!("/products?search={}", urlencoding::encode(term));
        let items = Self::decode_products(self.get_array(&path, &[]).await?)?;
        info!("Search '{}' returned {} items", term, items.len());
        Ok(items)
    }

    async fn list_items(&self, category: Option<&str>) -> Result<Vec<CatalogItem>, CatalogError> {
        let values = self
            .get_paged("/products", &[("status", "publish".to_string())])
            .await?;
        let mut items = Self::decode_products(values)?;
        if let Some(slug) = category {
            items.retain(|item| has_category(item, slug));
        }

        info!("Fetched {} items from {}", items.len(), self.config.name);
        Ok(items)
    }
}
