//! Per-size stock derived from variation records.
//!
//! Reconciliation never fails: a variation without a recognizable size
//! attribute simply contributes to no size bucket.

use std::time::Duration;

use crate::cache::QueryCache;
use crate::models::{
    CatalogItem, StockBySize, StockEntry, StockStatus, VariationAttribute, VariationRecord,
};

/// Attribute-name fragments that mark a size attribute. `tama` covers
/// "tamanho" and "tamaño"; the `pa_` forms are global attribute slugs.
const SIZE_TOKENS: [&str; 4] = ["size", "tama", "pa_size", "pa_tama"];

/// Separator between a size label and its annotation, as in `"XL - 59"`.
const LABEL_DELIMITER: &str = " - ";

/// Key used for items sold without variations.
pub const DEFAULT_SIZE: &str = "default";

/// First attribute whose name looks like a size.
pub fn size_attribute(attributes: &[VariationAttribute]) -> Option<&VariationAttribute> {
    attributes.iter().find(|attr| {
        let name = attr.name.to_lowercase();
        SIZE_TOKENS.iter().any(|token| name.contains(token))
    })
}

/// Upper-cases a size value and strips any `" - ..."` annotation.
pub fn normalize_size_label(value: &str) -> String {
    let upper = value.to_uppercase();
    match upper.find(LABEL_DELIMITER) {
        Some(idx) => upper[..idx].to_string(),
        None => upper,
    }
}

fn clamp_quantity(quantity: Option<i64>) -> u32 {
    quantity
        .unwrap_or(0)
        .clamp(0, i64::from(u32::MAX))
        .try_into()
        .unwrap_or(0)
}

/// Builds the size map for `item`.
///
/// Records are applied in order, so a repeated label keeps the last record's
/// values.
pub fn resolve_stock_by_size(item: &CatalogItem, variations: &[VariationRecord]) -> StockBySize {
    let mut stock = StockBySize::new();

    if variations.is_empty() {
        let quantity = clamp_quantity(Some(item.available));
        stock.insert(
            DEFAULT_SIZE.to_string(),
            StockEntry {
                quantity,
                status: item
                    .stock_status
                    .unwrap_or_else(|| StockStatus::from_quantity(quantity)),
            },
        );
        return stock;
    }

    for variation in variations {
        let Some(attribute) = size_attribute(&variation.attributes) else {
            continue;
        };

        let quantity = clamp_quantity(variation.quantity);
        let status = variation
            .status
            .unwrap_or_else(|| StockStatus::from_quantity(quantity));

        stock.insert(
            normalize_size_label(&attribute.option),
            StockEntry { quantity, status },
        );
    }

    stock
}

/// Short-lived cache of reconciled stock, keyed `stock:{id}`.
#[derive(Clone)]
pub struct StockCache {
    cache: QueryCache<StockBySize>,
}

impl StockCache {
    pub const PREFIX: &'static str = "stock:";

    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: QueryCache::new(ttl),
        }
    }

    pub fn key(item_id: i64) -> String {
        format!("{}{item_id}", Self::PREFIX)
    }

    pub fn get(&self, item_id: i64) -> Option<StockBySize> {
        self.cache.get(&Self::key(item_id))
    }

    pub fn insert(&self, item_id: i64, stock: StockBySize) {
        self.cache.insert(Self::key(item_id), stock);
    }

    pub fn inner(&self) -> &QueryCache<StockBySize> {
        &self.cache
    }
}
