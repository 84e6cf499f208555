//! Optional secondary data source, resolved once at startup.
//!
//! Business logic never polls for the bridge: it either resolved within the
//! bounded wait or it is absent, and callers supply the path to take when it
//! is absent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

pub struct Bridge<T: ?Sized> {
    client: Option<Arc<T>>,
}

impl<T: ?Sized> Clone for Bridge<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<T: ?Sized> Bridge<T> {
    pub fn absent() -> Self {
        Self { client: None }
    }

    /// Waits at most `wait` for `ready` to confirm `candidate` is usable.
    pub async fn resolve<F, Fut>(candidate: Option<Arc<T>>, wait: Duration, ready: F) -> Self
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = bool>,
    {
        let Some(client) = candidate else {
            info!("No bridge configured");
            return Self::absent();
        };

        match tokio::time::timeout(wait, ready(Arc::clone(&client))).await {
            Ok(true) => {
                info!("Bridge resolved");
                Self {
                    client: Some(client),
                }
            }
            Ok(false) => {
                warn!("Bridge not ready, continuing without it");
                Self::absent()
            }
            Err(_) => {
                warn!("Bridge did not answer within {:?}, continuing without it", wait);
                Self::absent()
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    /// Runs `call` on the bridge when present, `fallback` otherwise.
    pub async fn call_or_else<R, F, Fut, G, GFut>(&self, call: F, fallback: G) -> R
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = R>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = R>,
    {
        match &self.client {
            Some(client) => call(Arc::clone(client)).await,
            None => fallback().await,
        }
    }
}
