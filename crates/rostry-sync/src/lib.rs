//! rostry-sync - Offline-first sync engine for ROSTRY
//!
//! This crate keeps a local entity cache and a durable outbox of local
//! mutations, reconciles both with a remote document store under
//! intermittent connectivity, surfaces conflicts, and coalesces concurrent
//! read-side fetches.

pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{DomainPolicy, DrainOrder, FetchPolicy, SyncConfig};
pub use error::{Error, RemoteError, RemoteErrorKind, Result};
pub use fetch::{FetchRequest, Fetcher, FetcherCoordinator, FetcherDefinition, Resource};
pub use models::{CacheEntry, EntityType, OutboxEntry, OutboxStatus, SyncConflict};
pub use services::DatabaseService;
pub use state::SyncState;
pub use sync::{SyncManager, SyncReport, SyncStatus, WriteJournal};
