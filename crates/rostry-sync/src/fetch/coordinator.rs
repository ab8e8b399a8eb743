//! Fetcher coordinator: registered fetchers behind a TTL cache and the
//! request coalescer.
//!
//! Every call to [`FetcherCoordinator::fetch`] yields a stream of
//! [`Resource`] values: `Loading`, then either a cached `Success`, a fresh
//! `Success` from the source, or `Error`. A stale cache hit yields the stale
//! `Success` first and then the outcome of the refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::config::{FetchPolicy, SyncConfig};
use crate::error::{Error, RemoteError, Result};
use crate::fetch::cache::{Lookup, ResultCache};
use crate::fetch::coalescer::RequestCoalescer;
use crate::fetch::events::{EventBus, FetchEvent};
use crate::fetch::metrics::{FetcherHealth, FetcherMetrics, MetricsSnapshot};
use crate::fetch::resource::Resource;

/// Data source behind one fetcher id.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, params: &Value) -> std::result::Result<Value, RemoteError>;
}

#[derive(Clone)]
pub struct FetcherDefinition {
    pub id: String,
    pub fetcher: Arc<dyn Fetcher>,
    pub policy: FetchPolicy,
}

impl FetcherDefinition {
    pub fn new(id: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            id: id.into(),
            fetcher,
            policy: FetchPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub fetcher_id: String,
    pub params: Value,
    /// Skip the cache and go to the source
    pub force_refresh: bool,
}

impl FetchRequest {
    pub fn new(fetcher_id: impl Into<String>, params: Value) -> Self {
        Self {
            fetcher_id: fetcher_id.into(),
            params,
            force_refresh: false,
        }
    }

    #[must_use]
    pub const fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    /// Coalescing and cache key. Object keys serialize in sorted order, so
    /// equal params give equal keys.
    pub fn key(&self) -> String {
        format!("{}:{}", self.fetcher_id, self.params)
    }
}

#[derive(Clone)]
struct Registered {
    definition: FetcherDefinition,
    metrics: Arc<FetcherMetrics>,
}

pub struct FetcherCoordinator {
    fetchers: RwLock<HashMap<String, Registered>>,
    cache: Arc<ResultCache>,
    coalescer: RequestCoalescer<String, Resource<Value>>,
    events: EventBus,
}

impl FetcherCoordinator {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            fetchers: RwLock::new(HashMap::new()),
            cache: Arc::new(ResultCache::new()),
            coalescer: RequestCoalescer::new(config.max_coalesced_requests),
            events: EventBus::new(config.event_buffer_capacity),
        }
    }

    /// Register a fetcher, replacing any earlier definition with the same id.
    pub async fn register(&self, definition: FetcherDefinition) {
        tracing::debug!(fetcher_id = %definition.id, "Registering fetcher");
        self.fetchers.write().await.insert(
            definition.id.clone(),
            Registered {
                definition,
                metrics: Arc::new(FetcherMetrics::default()),
            },
        );
    }

    /// Start or join the fetch for `request`.
    pub async fn fetch(
        &self,
        request: FetchRequest,
    ) -> Result<BoxStream<'static, Resource<Value>>> {
        let registered = self
            .fetchers
            .read()
            .await
            .get(&request.fetcher_id)
            .cloned()
            .ok_or_else(|| Error::FetcherNotRegistered(request.fetcher_id.clone()))?;
        registered.metrics.record_request();

        let key = request.key();
        let execution = Execution {
            key: key.clone(),
            params: request.params,
            force_refresh: request.force_refresh,
            definition: registered.definition,
            metrics: registered.metrics,
            cache: Arc::clone(&self.cache),
            events: self.events.clone(),
        };

        Ok(self
            .coalescer
            .execute_or_join(key, move || execution.run())
            .await)
    }

    /// Typed variant of [`fetch`](Self::fetch). Values that fail to decode
    /// arrive as `Resource::Error`.
    pub async fn fetch_as<T>(
        &self,
        request: FetchRequest,
    ) -> Result<BoxStream<'static, Resource<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let stream = self.fetch(request).await?;
        Ok(stream
            .map(|resource| resource.and_then(serde_json::from_value::<T>))
            .boxed())
    }

    /// Run a fetch to completion and return its last state.
    pub async fn fetch_latest(&self, request: FetchRequest) -> Result<Resource<Value>> {
        let stream = self.fetch(request).await?;
        Ok(stream
            .fold(Resource::Loading, |_, resource| async move { resource })
            .await)
    }

    /// Drop cached results for `fetcher_id`.
    pub async fn invalidate(&self, fetcher_id: &str) -> usize {
        let dropped = self.cache.invalidate(fetcher_id).await;
        tracing::debug!(fetcher_id, dropped, "Invalidated fetcher cache");
        dropped
    }

    pub async fn metrics(&self, fetcher_id: &str) -> Option<MetricsSnapshot> {
        self.fetchers
            .read()
            .await
            .get(fetcher_id)
            .map(|registered| registered.metrics.snapshot())
    }

    pub async fn health(&self, fetcher_id: &str) -> Option<FetcherHealth> {
        self.metrics(fetcher_id)
            .await
            .map(|snapshot| snapshot.health())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FetchEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> BoxStream<'static, FetchEvent> {
        self.events.stream()
    }

    pub async fn in_flight_count(&self) -> usize {
        self.coalescer.in_flight_count().await
    }
}

#[derive(Clone, Copy)]
enum Step {
    Begin,
    CheckCache,
    Source,
    Finished,
}

/// One coalesced execution of a fetch request.
struct Execution {
    key: String,
    params: Value,
    force_refresh: bool,
    definition: FetcherDefinition,
    metrics: Arc<FetcherMetrics>,
    cache: Arc<ResultCache>,
    events: EventBus,
}

impl Execution {
    fn run(self) -> BoxStream<'static, Resource<Value>> {
        stream::unfold((self, Step::Begin), |(execution, mut step)| async move {
            loop {
                match step {
                    Step::Begin => {
                        execution.events.publish(FetchEvent::Started {
                            fetcher_id: execution.definition.id.clone(),
                            key: execution.key.clone(),
                        });
                        return Some((Resource::Loading, (execution, Step::CheckCache)));
                    }
                    Step::CheckCache if execution.force_refresh => step = Step::Source,
                    Step::CheckCache => match execution.check_cache().await {
                        Lookup::Fresh(value) => {
                            return Some((Resource::Success(value), (execution, Step::Finished)));
                        }
                        Lookup::Stale(value) => {
                            return Some((Resource::Success(value), (execution, Step::Source)));
                        }
                        Lookup::Miss => step = Step::Source,
                    },
                    Step::Source => {
                        let resource = execution.call_source().await;
                        return Some((resource, (execution, Step::Finished)));
                    }
                    Step::Finished => return None,
                }
            }
        })
        .boxed()
    }

    async fn check_cache(&self) -> Lookup {
        let lookup = self.cache.lookup(&self.key, &self.definition.policy).await;
        match &lookup {
            Lookup::Fresh(_) => {
                self.metrics.record_hit();
                self.events.publish(FetchEvent::Completed {
                    fetcher_id: self.definition.id.clone(),
                    key: self.key.clone(),
                    from_cache: true,
                    latency: std::time::Duration::ZERO,
                });
            }
            Lookup::Stale(_) => {
                self.metrics.record_stale_hit();
                tracing::debug!(
                    fetcher_id = %self.definition.id,
                    key = %self.key,
                    "Serving stale result while refreshing"
                );
            }
            Lookup::Miss => self.metrics.record_miss(),
        }
        lookup
    }

    async fn call_source(&self) -> Resource<Value> {
        let started = Instant::now();
        let result = self.definition.fetcher.fetch(&self.params).await;
        let latency = started.elapsed();

        match result {
            Ok(value) => {
                self.metrics.record_success(latency);
                self.cache
                    .store(&self.key, &self.definition.id, value.clone())
                    .await;
                self.events.publish(FetchEvent::Completed {
                    fetcher_id: self.definition.id.clone(),
                    key: self.key.clone(),
                    from_cache: false,
                    latency,
                });
                Resource::Success(value)
            }
            Err(error) => {
                self.metrics.record_failure(latency);
                tracing::warn!(
                    fetcher_id = %self.definition.id,
                    key = %self.key,
                    %error,
                    "Fetch failed"
                );
                self.events.publish(FetchEvent::Failed {
                    fetcher_id: self.definition.id.clone(),
                    key: self.key.clone(),
                    error: error.to_string(),
                });
                Resource::Error(error.to_string())
            }
        }
    }
}
