//! Aggregate result of one sync cycle.

use serde::{Deserialize, Serialize};

use crate::models::EntityType;

/// Overall outcome of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Everything attempted succeeded
    Success,
    /// Some entries or domains failed; the rest were applied
    Partial,
    /// Device offline; the push phase was skipped
    Offline,
    /// Another cycle was already running
    Skipped,
    /// Work was attempted and none of it succeeded
    Error,
}

/// Outbox drain counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxReport {
    /// Entries claimed from the journal
    pub claimed: usize,
    /// Remote push calls made, including retries
    pub attempts: usize,
    pub completed: usize,
    /// Entries with no registered handler, completed without a push
    pub noop: usize,
    /// Extra attempts after a transient failure
    pub retried: usize,
    /// Entries that ended failed
    pub failed: usize,
    /// Entries left pending for a later cycle
    pub deferred: usize,
}

/// Per-domain counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainReport {
    pub entity_type: EntityType,
    pub pulled: usize,
    pub pushed: usize,
    pub conflicts: usize,
    /// Pull or push skipped by policy or connectivity
    pub skipped: bool,
    pub error: Option<String>,
}

impl DomainReport {
    pub const fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            pulled: 0,
            pushed: 0,
            conflicts: 0,
            skipped: false,
            error: None,
        }
    }

    fn record_error(&mut self, error: String) {
        self.error = Some(match self.error.take() {
            Some(previous) => format!("{previous}; {error}"),
            None => error,
        });
    }

    pub(crate) fn pull_failed(&mut self, error: impl ToString) {
        self.record_error(error.to_string());
    }

    pub(crate) fn push_failed(&mut self, error: impl ToString) {
        self.record_error(error.to_string());
    }
}

/// Result of `SyncManager::sync_all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub outbox: OutboxReport,
    pub domains: Vec<DomainReport>,
    /// Completed outbox rows purged
    pub purged: usize,
    /// Stale in-progress claims returned to pending
    pub released: usize,
    pub started_at: i64,
    pub finished_at: i64,
}

impl SyncReport {
    pub(crate) const fn new(started_at: i64) -> Self {
        Self {
            status: SyncStatus::Success,
            outbox: OutboxReport {
                claimed: 0,
                attempts: 0,
                completed: 0,
                noop: 0,
                retried: 0,
                failed: 0,
                deferred: 0,
            },
            domains: Vec::new(),
            purged: 0,
            released: 0,
            started_at,
            finished_at: started_at,
        }
    }

    pub(crate) fn skipped(now: i64) -> Self {
        let mut report = Self::new(now);
        report.status = SyncStatus::Skipped;
        report
    }

    pub fn conflicts(&self) -> usize {
        self.domains.iter().map(|domain| domain.conflicts).sum()
    }

    pub fn pulled(&self) -> usize {
        self.domains.iter().map(|domain| domain.pulled).sum()
    }

    pub fn pushed(&self) -> usize {
        self.domains.iter().map(|domain| domain.pushed).sum()
    }

    pub fn domain(&self, entity_type: &EntityType) -> Option<&DomainReport> {
        self.domains
            .iter()
            .find(|domain| &domain.entity_type == entity_type)
    }

    /// Derive the overall status from the counts. Conflicts are not failures.
    pub(crate) fn finish(&mut self, online: bool, finished_at: i64) {
        self.finished_at = finished_at;
        if !online {
            self.status = SyncStatus::Offline;
            return;
        }

        let failures = self.outbox.failed
            + self
                .domains
                .iter()
                .filter(|domain| domain.error.is_some())
                .count();
        let successes = self.outbox.completed
            + self.outbox.noop
            + self
                .domains
                .iter()
                .filter(|domain| !domain.skipped && domain.error.is_none())
                .count();

        self.status = if failures == 0 {
            SyncStatus::Success
        } else if successes == 0 {
            SyncStatus::Error
        } else {
            SyncStatus::Partial
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_cycle_is_success() {
        let mut report = SyncReport::new(1);
        report.outbox.completed = 2;
        report.domains.push(DomainReport::new(EntityType::Order));

        report.finish(true, 5);
        assert_eq!(report.status, SyncStatus::Success);
        assert_eq!(report.finished_at, 5);
    }

    #[test]
    fn conflicts_do_not_degrade_status() {
        let mut report = SyncReport::new(1);
        let mut domain = DomainReport::new(EntityType::Product);
        domain.conflicts = 1;
        report.domains.push(domain);

        report.finish(true, 2);
        assert_eq!(report.status, SyncStatus::Success);
        assert_eq!(report.conflicts(), 1);
    }

    #[test]
    fn mixed_outcome_is_partial() {
        let mut report = SyncReport::new(1);
        report.outbox.completed = 1;
        report.outbox.failed = 1;

        report.finish(true, 2);
        assert_eq!(report.status, SyncStatus::Partial);
    }

    #[test]
    fn only_failures_is_error() {
        let mut report = SyncReport::new(1);
        let mut domain = DomainReport::new(EntityType::User);
        domain.pull_failed("Remote network error: unreachable");
        domain.push_failed("Remote network error: unreachable");
        report.domains.push(domain);

        report.finish(true, 2);
        assert_eq!(report.status, SyncStatus::Error);
        assert_eq!(
            report.domain(&EntityType::User).unwrap().error.as_deref(),
            Some("Remote network error: unreachable; Remote network error: unreachable")
        );
    }

    #[test]
    fn offline_overrides_counts() {
        let mut report = SyncReport::new(1);
        report.outbox.failed = 3;

        report.finish(false, 2);
        assert_eq!(report.status, SyncStatus::Offline);
    }
}
