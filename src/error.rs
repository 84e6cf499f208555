//! Error types shared by the catalog client, the mirror and the sync reconciler.

use thiserror::Error;

use crate::models::SyncResult;

/// Failures of calls against the remote e-commerce backend.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// DNS failure, refused or reset connection, aborted request.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx status not covered by a more specific variant.
    #[error("remote returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("insufficient permissions: {0}")]
    Permission(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    /// The circuit breaker rejected the call without touching the network.
    #[error("circuit open: backend calls are suspended")]
    CircuitOpen,

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Actionable guidance for credential problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remediation {
    pub message: &'static str,
    pub settings_url: String,
}

impl CatalogError {
    /// Builds the error matching an HTTP status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Auth(message),
            403 => Self::Permission(message),
            404 => Self::NotFound(message),
            _ => Self::Remote { status, message },
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Remote { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Remediation for authentication and permission failures.
    ///
    /// The two cases get distinct messages: bad credentials need new keys,
    /// a valid key with the wrong scope needs its permissions raised.
    pub fn remediation(&self, backend_base_url: &str) -> Option<Remediation> {
        let message = match self {
            Self::Auth(_) => {
                "The API credentials were rejected. Generate a new consumer key and secret."
            }
            Self::Permission(_) => {
                "The API key lacks the required scope. Grant it read/write access."
            }
            _ => return None,
        };

        Some(Remediation {
            message,
            settings_url: credential_settings_url(backend_base_url),
        })
    }
}

/// Location of the key management page for a REST base such as
/// `https://shop.example/wp-json/wc/v3`.
fn credential_settings_url(backend_base_url: &str) -> String {
    let site = backend_base_url
        .split("/wp-json")
        .next()
        .unwrap_or(backend_base_url)
        .trim_end_matches('/');
    format!("{site}/wp-admin/admin.php?page=wc-settings&tab=advanced&section=keys")
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Failures of the durable mirror.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("invalid source data: {0}")]
    SourceData(#[from] serde_json::Error),

    /// Raised by non-SQL stores.
    #[error("mirror unavailable: {0}")]
    Unavailable(String),
}

/// One item that could not be written during a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub id: i64,
    pub reason: String,
}

/// A sync run that committed some items and failed on others.
#[derive(Debug, Clone)]
pub struct SyncPartialFailure {
    pub succeeded: usize,
    pub failed: Vec<FailedItem>,
    pub result: SyncResult,
}

impl SyncPartialFailure {
    /// Identifiers to pass back into the next run.
    pub fn failed_ids(&self) -> Vec<i64> {
        self.failed.iter().map(|f| f.id).collect()
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("sync partially failed: {} committed, {} failed", .0.succeeded, .0.failed.len())]
    Partial(SyncPartialFailure),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}
