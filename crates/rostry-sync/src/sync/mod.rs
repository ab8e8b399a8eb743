//! Offline-first synchronization: write journal, reconciliation cycle,
//! conflict detection and background scheduling.

pub mod conflict;
mod connectivity;
mod domain;
mod journal;
mod manager;
mod remote;
mod report;
mod scheduler;

#[cfg(test)]
mod tests;

pub use connectivity::{Connectivity, StaticConnectivity};
pub use domain::{DomainSync, PullOutcome, PushHandler, SyncContext, TypedDomain};
pub use journal::WriteJournal;
pub use manager::{SyncManager, SyncManagerBuilder};
pub use remote::RemoteStore;
pub use report::{DomainReport, OutboxReport, SyncReport, SyncStatus};
pub use scheduler::{BackgroundSync, SyncTrigger};
