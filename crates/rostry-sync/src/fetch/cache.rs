//! In-memory TTL cache for fetcher results.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::FetchPolicy;

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Within the TTL
    Fresh(Value),
    /// Past the TTL but still inside the stale window
    Stale(Value),
    Miss,
}

struct CachedResult {
    fetcher_id: String,
    value: Value,
    stored_at: Instant,
}

#[derive(Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<String, CachedResult>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lookup(&self, key: &str, policy: &FetchPolicy) -> Lookup {
        self.lookup_at(key, policy, Instant::now()).await
    }

    pub async fn lookup_at(&self, key: &str, policy: &FetchPolicy, now: Instant) -> Lookup {
        let lookup = {
            let entries = self.entries.read().await;
            let Some(cached) = entries.get(key) else {
                return Lookup::Miss;
            };
            let age = now.saturating_duration_since(cached.stored_at);
            if age < policy.ttl {
                Lookup::Fresh(cached.value.clone())
            } else if age < policy.ttl.saturating_add(policy.max_stale) {
                Lookup::Stale(cached.value.clone())
            } else {
                Lookup::Miss
            }
        };

        if lookup == Lookup::Miss {
            // Expired past the stale window
            self.entries.write().await.remove(key);
        }
        lookup
    }

    pub async fn store(&self, key: &str, fetcher_id: &str, value: Value) {
        self.store_at(key, fetcher_id, value, Instant::now()).await;
    }

    pub async fn store_at(&self, key: &str, fetcher_id: &str, value: Value, now: Instant) {
        self.entries.write().await.insert(
            key.to_string(),
            CachedResult {
                fetcher_id: fetcher_id.to_string(),
                value,
                stored_at: now,
            },
        );
    }

    /// Drop every result produced by `fetcher_id`. Returns how many were dropped.
    pub async fn invalidate(&self, fetcher_id: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, cached| cached.fetcher_id != fetcher_id);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn policy() -> FetchPolicy {
        FetchPolicy::new(Duration::from_secs(60), Duration::from_secs(120))
    }

    #[tokio::test]
    async fn lookup_classifies_by_age() {
        let cache = ResultCache::new();
        let stored = Instant::now();
        cache
            .store_at("products:{}", "products", json!([1, 2]), stored)
            .await;

        assert_eq!(
            cache.lookup_at("products:{}", &policy(), stored).await,
            Lookup::Fresh(json!([1, 2]))
        );
        assert_eq!(
            cache
                .lookup_at("products:{}", &policy(), stored + Duration::from_secs(90))
                .await,
            Lookup::Stale(json!([1, 2]))
        );
        assert_eq!(
            cache
                .lookup_at("products:{}", &policy(), stored + Duration::from_secs(200))
                .await,
            Lookup::Miss
        );
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn no_cache_policy_never_serves() {
        let cache = ResultCache::new();
        cache.store("k", "f", json!(1)).await;

        assert_eq!(cache.lookup("k", &FetchPolicy::no_cache()).await, Lookup::Miss);
        assert_eq!(cache.lookup("missing", &policy()).await, Lookup::Miss);
    }

    #[tokio::test]
    async fn invalidate_drops_only_that_fetcher() {
        let cache = ResultCache::new();
        cache.store("products:{}", "products", json!(1)).await;
        cache.store("products:{\"page\":2}", "products", json!(2)).await;
        cache.store("orders:{}", "orders", json!(3)).await;

        assert_eq!(cache.invalidate("products").await, 2);
        assert_eq!(cache.len().await, 1);
        assert_eq!(
            cache.lookup("orders:{}", &policy()).await,
            Lookup::Fresh(json!(3))
        );
    }
}
