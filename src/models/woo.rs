//! Wire shapes of the WooCommerce REST API

use serde::Deserialize;
use serde_json::Value;

use super::{CatalogItem, StockStatus, VariationAttribute, VariationRecord};

#[derive(Debug, Clone, Deserialize)]
pub struct WooProduct {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default)]
    pub regular_price: Option<Value>,
    #[serde(default)]
    pub stock_quantity: Option<i64>,
    #[serde(default)]
    pub stock_status: Option<String>,
    #[serde(default)]
    pub categories: Vec<WooCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WooCategory {
    #[serde(default)]
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WooVariation {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub attributes: Vec<WooAttribute>,
    #[serde(default)]
    pub stock_quantity: Option<i64>,
    #[serde(default)]
    pub stock_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WooAttribute {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub option: String,
}

/// Reads a price that may arrive as `"12.50"`, `12.5`, `""` or `null`.
fn parse_price(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

impl WooProduct {
    /// Converts a raw product document into a [`CatalogItem`], keeping the
    /// document as the item's source data.
    pub fn into_item(self, raw: Value) -> CatalogItem {
        let price_per_day = parse_price(self.price.as_ref())
            .or_else(|| parse_price(self.regular_price.as_ref()))
            .unwrap_or(0.0);

        let category = self
            .categories
            .into_iter()
            .map(|c| c.slug)
            .find(|slug| !slug.is_empty())
            .unwrap_or_else(|| "uncategorized".to_string());

        CatalogItem {
            id: self.id,
            name: self.name,
            price_per_day,
            available: self.stock_quantity.unwrap_or(0),
            stock_status: self.stock_status.as_deref().and_then(StockStatus::from_wire),
            category,
            source_data: Some(raw),
        }
    }
}

impl WooVariation {
    pub fn into_record(self, item_id: i64) -> VariationRecord {
        VariationRecord {
            item_id,
            attributes: self
                .attributes
                .into_iter()
                .map(|a| VariationAttribute {
                    name: a.name,
                    option: a.option,
                })
                .collect(),
            quantity: self.stock_quantity,
            status: self.stock_status.as_deref().and_then(StockStatus::from_wire),
        }
    }
}

/// Decodes a product document, keeping the raw JSON alongside.
pub fn decode_product(raw: Value) -> Result<CatalogItem, serde_json::Error> {
    let product: WooProduct = serde_json::from_value(raw.clone())?;
    Ok(product.into_item(raw))
}
