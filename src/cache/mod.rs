//! Keyed TTL cache for query results, invalidated by refresh signals.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::notify::RefreshSignal;

/// Which entries a refresh signal evicts.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// Entries inserted longer ago than this are dropped.
    pub stale_after: Duration,
    /// Entries whose key starts with any of these are dropped regardless of age.
    pub prefixes: Vec<String>,
}

#[derive(Clone)]
struct CachedEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Query results keyed by string, each kept for at most `ttl`.
///
/// Expired entries linger until they are read or a refresh sweeps them.
#[derive(Clone)]
pub struct QueryCache<V> {
    entries: Arc<DashMap<String, CachedEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::default(),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let ttl = self.ttl;
        let hit = self
            .entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < ttl)
            .map(|entry| entry.value.clone());

        if hit.is_none() {
            self.entries
                .remove_if(key, |_, entry| entry.stored_at.elapsed() >= ttl);
        }
        hit
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let entry = CachedEntry {
            value,
            stored_at: Instant::now(),
        };
        self.entries.insert(key.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts the keys under `prefix` and returns how many were evicted.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.evict(|key, _| key.starts_with(prefix))
    }

    /// Evicts entries older than the policy allows plus anything under one of
    /// its prefixes.
    pub fn apply_refresh(&self, signal: &RefreshSignal, policy: &RefreshPolicy) -> usize {
        let removed = self.evict(|key, stored_at| {
            stored_at.elapsed() > policy.stale_after
                || policy.prefixes.iter().any(|p| key.starts_with(p.as_str()))
        });
        debug!(
            "Refresh from '{}' evicted {} cache entries",
            signal.source, removed
        );
        removed
    }

    fn evict(&self, doomed: impl Fn(&str, Instant) -> bool) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            let keep = !doomed(key, entry.stored_at);
            removed += usize::from(!keep);
            keep
        });
        removed
    }
}
