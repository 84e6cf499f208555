//! Environment-driven configuration.
//!
//! Values are read once at startup; `.env` files are loaded by the binary
//! through `dotenvy` before [`AppConfig::from_env`] runs.

use std::str::FromStr;
use std::time::Duration;

use crate::catalog::CatalogConfig;
use crate::error::ConfigError;
use crate::resilience::BreakerPolicy;
use crate::resilience::backoff::RetryPolicy;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    /// Only items in this category are listed and mirrored
    pub category: Option<String>,
    pub breaker: BreakerPolicy,
    pub stock_cache_ttl: Duration,
    pub catalog_cache_ttl: Duration,
    /// Age beyond which a refresh signal evicts any cached entry
    pub refresh_stale_after: Duration,
    pub alert_cooldown: Duration,
    pub connectivity_interval: Duration,
    pub mirror_url: String,
    pub sync_cron: String,
    pub bridge_url: Option<String>,
    pub bridge_wait: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            category: None,
            breaker: BreakerPolicy::default(),
            stock_cache_ttl: Duration::from_secs(90),
            catalog_cache_ttl: Duration::from_secs(300),
            refresh_stale_after: Duration::from_secs(300),
            alert_cooldown: Duration::from_secs(120),
            connectivity_interval: Duration::from_secs(30),
            mirror_url: "sqlite:database/catalog.db".to_string(),
            sync_cron: "0 */15 * * * *".to_string(),
            bridge_url: None,
            bridge_wait: Duration::from_millis(2000),
        }
    }
}

struct Reader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Reader<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default_ms).map(Duration::from_millis)
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Reader { lookup };
        let d = Self::default();

        let retry = RetryPolicy {
            max_retries: env.parse("WC_RETRY_COUNT", d.catalog.retry.max_retries)?,
            base_delay: env.millis("WC_RETRY_BASE_MS", d.catalog.retry.base_delay)?,
            max_delay: env.millis("WC_RETRY_MAX_MS", d.catalog.retry.max_delay)?,
        };

        let catalog = CatalogConfig {
            name: d.catalog.name,
            base_url: env.string("WC_BASE_URL").unwrap_or(d.catalog.base_url),
            consumer_key: env.string("WC_CONSUMER_KEY").unwrap_or_default(),
            consumer_secret: env.string("WC_CONSUMER_SECRET").unwrap_or_default(),
            timeout: env.millis("WC_TIMEOUT_MS", d.catalog.timeout)?,
            retry,
        };

        let breaker = BreakerPolicy {
            failure_threshold: env.parse("BREAKER_THRESHOLD", d.breaker.failure_threshold)?,
            cooldown: env.secs("BREAKER_COOLDOWN_SECS", d.breaker.cooldown)?,
            max_cooldown: env.secs("BREAKER_MAX_COOLDOWN_SECS", d.breaker.max_cooldown)?,
            window: env.parse("BREAKER_WINDOW", d.breaker.window)?,
        };

        Ok(Self {
            catalog,
            category: env.string("WC_CATEGORY"),
            breaker,
            stock_cache_ttl: env.secs("STOCK_CACHE_TTL_SECS", d.stock_cache_ttl)?,
            catalog_cache_ttl: env.secs("CATALOG_CACHE_TTL_SECS", d.catalog_cache_ttl)?,
            refresh_stale_after: env.secs("REFRESH_STALE_SECS", d.refresh_stale_after)?,
            alert_cooldown: env.secs("ALERT_COOLDOWN_SECS", d.alert_cooldown)?,
            connectivity_interval: env.secs("CONNECTIVITY_INTERVAL_SECS", d.connectivity_interval)?,
            mirror_url: env.string("MIRROR_DATABASE_URL").unwrap_or(d.mirror_url),
            sync_cron: env.string("SYNC_CRON").unwrap_or(d.sync_cron),
            bridge_url: env.string("BRIDGE_URL"),
            bridge_wait: env.millis("BRIDGE_WAIT_MS", d.bridge_wait)?,
        })
    }
}
