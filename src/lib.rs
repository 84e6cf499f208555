//! Resilient data access for a bike-rental storefront.
//!
//! The REST client talks to the WooCommerce backend behind a circuit breaker,
//! stock is reconciled per size from variation records, and a sync reconciler
//! copies the catalog into a SQLite mirror that serves reads when the backend
//! is down.

pub mod bridge;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod notify;
pub mod rental_catalog;
pub mod resilience;
pub mod stock;
pub mod sync;
pub mod traits;

#[cfg(test)]
mod test_support;
