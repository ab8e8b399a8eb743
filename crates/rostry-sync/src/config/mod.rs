//! Sync engine configuration.
//!
//! `SyncConfig` carries the batch bounds, retry policy, retention window and
//! buffer sizes used by the journal, the sync manager and the fetcher
//! coordinator. Defaults mirror the production mobile client; embedders can
//! override them from `ROSTRY_SYNC_*` environment variables or a serialized
//! JSON document.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::EntityType;
use crate::util::normalize_text_option;

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;
const DEFAULT_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;
const DEFAULT_EVENT_BUFFER: usize = 64;
const DEFAULT_CONFLICT_BUFFER: usize = 32;
const DEFAULT_MAX_COALESCED: usize = 1000;
const DEFAULT_INTERVAL_SECS: u64 = 900;
const DEFAULT_FETCH_TTL_SECS: u64 = 60;
const DEFAULT_FETCH_MAX_STALE_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Order in which the outbox drain claims pending entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainOrder {
    /// Oldest `created_at` first
    #[default]
    Fifo,
    /// Highest priority first, then oldest
    Prioritized,
}

impl FromStr for DrainOrder {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "prioritized" | "priority" => Ok(Self::Prioritized),
            other => Err(ConfigError::Invalid(format!(
                "unknown drain order '{other}' (expected fifo or prioritized)"
            ))),
        }
    }
}

/// Per-domain switches for the pull and dirty-row push phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainPolicy {
    /// Pull remote changes for this domain
    pub pull: bool,
    /// Push dirty cache rows directly, independent of the outbox
    pub push_dirty: bool,
    /// Attempt the pull even when the device reports offline
    pub pull_when_offline: bool,
    /// Only talk to the remote for this domain over Wi-Fi
    pub wifi_only: bool,
}

impl Default for DomainPolicy {
    fn default() -> Self {
        Self {
            pull: true,
            push_dirty: false,
            pull_when_offline: false,
            wifi_only: false,
        }
    }
}

/// Freshness window for the cached results of one fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Results younger than this are served without calling the source
    pub ttl: Duration,
    /// Extra window past `ttl` in which a result is served while it refreshes
    pub max_stale: Duration,
}

impl FetchPolicy {
    pub const fn new(ttl: Duration, max_stale: Duration) -> Self {
        Self { ttl, max_stale }
    }

    /// Always call the source and never serve cached data.
    pub const fn no_cache() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_FETCH_TTL_SECS),
            Duration::from_secs(DEFAULT_FETCH_MAX_STALE_SECS),
        )
    }
}

/// Tunables for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum outbox entries claimed per cycle
    pub outbox_batch_size: usize,
    /// Maximum remote records fetched per domain per cycle, also the
    /// dirty-row push batch
    pub pull_page_size: usize,
    /// Cumulative push attempts before an entry is marked failed
    pub max_retries: u32,
    /// Fixed delay between in-cycle push attempts
    pub retry_backoff_ms: u64,
    /// How long completed outbox rows are kept
    pub completed_retention_ms: i64,
    /// Fetch lifecycle event buffer; oldest events are dropped on overflow
    pub event_buffer_capacity: usize,
    /// Conflict stream buffer; oldest conflicts are dropped on overflow
    pub conflict_buffer_capacity: usize,
    /// Upper bound on distinct in-flight coalesced keys
    pub max_coalesced_requests: usize,
    pub drain_order: DrainOrder,
    /// Background sync period
    pub periodic_interval_secs: u64,
    /// Policy overrides keyed by entity type label (e.g. `"ORDER"`)
    pub domain_policies: BTreeMap<String, DomainPolicy>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            outbox_batch_size: DEFAULT_BATCH_SIZE,
            pull_page_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            completed_retention_ms: DEFAULT_RETENTION_MS,
            event_buffer_capacity: DEFAULT_EVENT_BUFFER,
            conflict_buffer_capacity: DEFAULT_CONFLICT_BUFFER,
            max_coalesced_requests: DEFAULT_MAX_COALESCED,
            drain_order: DrainOrder::Fifo,
            periodic_interval_secs: DEFAULT_INTERVAL_SECS,
            domain_policies: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Load overrides from `ROSTRY_SYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    /// Load overrides through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            outbox_batch_size: parse_or(
                &lookup,
                "ROSTRY_SYNC_OUTBOX_BATCH_SIZE",
                defaults.outbox_batch_size,
            )?,
            pull_page_size: parse_or(&lookup, "ROSTRY_SYNC_PULL_PAGE_SIZE", defaults.pull_page_size)?,
            max_retries: parse_or(&lookup, "ROSTRY_SYNC_MAX_RETRIES", defaults.max_retries)?,
            retry_backoff_ms: parse_or(
                &lookup,
                "ROSTRY_SYNC_RETRY_BACKOFF_MS",
                defaults.retry_backoff_ms,
            )?,
            completed_retention_ms: parse_or(
                &lookup,
                "ROSTRY_SYNC_RETENTION_MS",
                defaults.completed_retention_ms,
            )?,
            event_buffer_capacity: parse_or(
                &lookup,
                "ROSTRY_SYNC_EVENT_BUFFER",
                defaults.event_buffer_capacity,
            )?,
            conflict_buffer_capacity: parse_or(
                &lookup,
                "ROSTRY_SYNC_CONFLICT_BUFFER",
                defaults.conflict_buffer_capacity,
            )?,
            max_coalesced_requests: parse_or(
                &lookup,
                "ROSTRY_SYNC_MAX_COALESCED",
                defaults.max_coalesced_requests,
            )?,
            drain_order: parse_or(&lookup, "ROSTRY_SYNC_DRAIN_ORDER", defaults.drain_order)?,
            periodic_interval_secs: parse_or(
                &lookup,
                "ROSTRY_SYNC_INTERVAL_SECS",
                defaults.periodic_interval_secs,
            )?,
            domain_policies: defaults.domain_policies,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject sizes that would stall the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("outbox_batch_size", self.outbox_batch_size),
            ("pull_page_size", self.pull_page_size),
            ("event_buffer_capacity", self.event_buffer_capacity),
            ("conflict_buffer_capacity", self.conflict_buffer_capacity),
            ("max_coalesced_requests", self.max_coalesced_requests),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be >= 1")));
            }
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be >= 1".to_string()));
        }
        if self.completed_retention_ms < 0 {
            return Err(ConfigError::Invalid(
                "completed_retention_ms must not be negative".to_string(),
            ));
        }
        if self.periodic_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "periodic_interval_secs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Override the policy for one domain.
    #[must_use]
    pub fn with_domain_policy(mut self, entity_type: &EntityType, policy: DomainPolicy) -> Self {
        self.domain_policies
            .insert(entity_type.as_str().to_string(), policy);
        self
    }

    /// Policy for a domain, falling back to `DomainPolicy::default()`.
    pub fn policy_for(&self, entity_type: &EntityType) -> DomainPolicy {
        self.domain_policies
            .get(entity_type.as_str())
            .copied()
            .unwrap_or_default()
    }

    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.completed_retention_ms).unwrap_or(0))
    }

    pub const fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }
}

fn parse_or<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match normalize_text_option(lookup(name)) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|error| ConfigError::Invalid(format!("{name}: {error}"))),
        None => Ok(default),
    }
}
