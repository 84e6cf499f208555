//! Data models for rentable catalog items, stock and health reporting

pub mod woo;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A rentable product and its base attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub name: String,
    pub price_per_day: f64,
    pub available: i64,
    /// The product's own status, used when it has no variations
    pub stock_status: Option<StockStatus>,
    pub category: String,
    pub source_data: Option<serde_json::Value>,
}

/// A named attribute on a variation, e.g. `Tamanho = "M - 52"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationAttribute {
    pub name: String,
    pub option: String,
}

/// A purchasable configuration of a [`CatalogItem`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationRecord {
    pub item_id: i64,
    pub attributes: Vec<VariationAttribute>,
    pub quantity: Option<i64>,
    pub status: Option<StockStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    OnBackorder,
}

impl StockStatus {
    /// Parses the backend's status strings (`instock`, `outofstock`, `onbackorder`).
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "instock" | "in_stock" => Some(Self::InStock),
            "outofstock" | "out_of_stock" => Some(Self::OutOfStock),
            "onbackorder" | "on_backorder" => Some(Self::OnBackorder),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InStock => "in_stock",
            Self::OutOfStock => "out_of_stock",
            Self::OnBackorder => "on_backorder",
        }
    }

    pub fn from_quantity(quantity: u32) -> Self {
        if quantity > 0 {
            Self::InStock
        } else {
            Self::OutOfStock
        }
    }
}

/// Availability of one size label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    pub quantity: u32,
    pub status: StockStatus,
}

/// Normalized size label to availability. A missing key means the size is not
/// offered; a zero quantity means offered but unavailable.
pub type StockBySize = BTreeMap<String, StockEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of the resilience monitor
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceSnapshot {
    pub consecutive_errors: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    /// Percentage over the trailing window, 100.0 when nothing was observed yet.
    pub success_rate: f64,
    pub healthy: bool,
    pub state: CircuitState,
    /// Time left before the next trial call is admitted, when the circuit is open.
    pub retry_after: Option<Duration>,
}

/// Outcome of one sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub total_in_database: i64,
    pub synced_at: DateTime<Utc>,
    pub success: bool,
}

/// Read-only health of the durable mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorStatus {
    pub available: bool,
    pub total_items: Option<i64>,
    pub latency: Duration,
    pub checked_at: DateTime<Utc>,
}

/// A mirrored item plus its content digest
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorRecord {
    pub item: CatalogItem,
    pub content_hash: String,
    pub synced_at: DateTime<Utc>,
}

impl MirrorRecord {
    pub fn new(item: CatalogItem) -> Self {
        let content_hash = content_hash(&item);
        Self {
            item,
            content_hash,
            synced_at: Utc::now(),
        }
    }
}

/// Deterministic digest of an item's canonical JSON form.
///
/// `serde_json` objects are ordered maps, so equal items always hash equally.
pub fn content_hash(item: &CatalogItem) -> String {
    let canonical = serde_json::to_vec(item).unwrap_or_default();
    format!("{:x}", md5::compute(canonical))
}

/// Bikes served when neither the backend nor the mirror can answer
pub fn fallback_catalog() -> Vec<CatalogItem> {
    [
        (1001, "City Bike", 15.0, "city"),
        (1002, "Mountain Bike", 25.0, "mountain"),
        (1003, "Road Bike", 30.0, "road"),
        (1004, "Electric Bike", 45.0, "electric"),
        (1005, "Kids Bike", 10.0, "kids"),
    ]
    .into_iter()
    .map(|(id, name, price, category)| CatalogItem {
        id,
        name: name.to_string(),
        price_per_day: price,
        available: 0,
        stock_status: None,
        category: category.to_string(),
        source_data: None,
    })
    .collect()
}
