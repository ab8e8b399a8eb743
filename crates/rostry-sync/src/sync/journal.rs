//! Write journal (outbox) on top of the database service.

use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};

use crate::config::{DrainOrder, SyncConfig};
use crate::error::{RemoteError, Result};
use crate::models::{NewOutboxEntry, OutboxEntry, OutboxEntryId, OutboxStatus, SyncIssue};
use crate::services::DatabaseService;
use crate::util::now_millis;

/// Upper bound for the sync issues list.
const ISSUE_LIST_LIMIT: usize = 500;

/// Durable ordered queue of local mutations awaiting remote push.
#[derive(Clone)]
pub struct WriteJournal {
    db: DatabaseService,
    max_retries: u32,
    drain_order: DrainOrder,
}

impl WriteJournal {
    pub const fn new(db: DatabaseService, max_retries: u32, drain_order: DrainOrder) -> Self {
        Self {
            db,
            max_retries,
            drain_order,
        }
    }

    pub fn from_config(db: DatabaseService, config: &SyncConfig) -> Self {
        Self::new(db, config.max_retries, config.drain_order)
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Append a mutation. Local only; never waits on the network.
    pub async fn enqueue(&self, draft: NewOutboxEntry) -> Result<OutboxEntry> {
        let entry = self.db.insert_outbox(draft).await?;
        tracing::debug!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            operation = entry.operation.as_str(),
            "Enqueued outbox entry"
        );
        Ok(entry)
    }

    /// Claim up to `limit` pending entries, marking them in progress.
    pub async fn claim_batch(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        self.db.claim_outbox(limit, self.drain_order).await
    }

    /// Take back an entry that was returned to pending between attempts.
    pub async fn reclaim(&self, id: &OutboxEntryId) -> Result<bool> {
        self.db.reclaim_outbox_entry(id).await
    }

    pub async fn mark_completed(&self, entry: &OutboxEntry) -> Result<()> {
        if !self.db.complete_outbox_entry(entry).await? {
            tracing::warn!(entry_id = %entry.id, "Completed entry no longer exists");
        }
        Ok(())
    }

    /// Record a failed attempt. The entry goes back to pending while
    /// `retry_count < max_retries`, otherwise it is failed.
    pub async fn mark_failed(
        &self,
        id: &OutboxEntryId,
        retry_count: u32,
        error: &RemoteError,
    ) -> Result<OutboxStatus> {
        let status = if retry_count < self.max_retries {
            OutboxStatus::Pending
        } else {
            OutboxStatus::Failed
        };
        self.db
            .record_outbox_failure(id, retry_count, status, error)
            .await?;
        Ok(status)
    }

    /// Fail an entry immediately regardless of its remaining retries.
    pub async fn mark_rejected(
        &self,
        id: &OutboxEntryId,
        retry_count: u32,
        error: &RemoteError,
    ) -> Result<()> {
        self.db
            .record_outbox_failure(id, retry_count, OutboxStatus::Failed, error)
            .await?;
        Ok(())
    }

    /// Delete completed entries older than the retention window.
    pub async fn purge_completed_older_than(&self, retention: Duration) -> Result<usize> {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(retention_ms);
        let purged = self.db.purge_completed_before(cutoff).await?;
        if purged > 0 {
            tracing::debug!(purged, "Purged completed outbox entries");
        }
        Ok(purged)
    }

    /// Return claims stranded by an interrupted cycle to pending.
    pub async fn release_stale_claims(&self) -> Result<usize> {
        let released = self.db.release_in_progress().await?;
        if released > 0 {
            tracing::warn!(released, "Released stale outbox claims");
        }
        Ok(released)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.db.count_outbox(OutboxStatus::Pending).await
    }

    /// Failed entries with their classification, oldest first.
    pub async fn sync_issues(&self) -> Result<Vec<SyncIssue>> {
        let failed = self
            .db
            .outbox_by_status(OutboxStatus::Failed, ISSUE_LIST_LIMIT)
            .await?;
        Ok(failed.into_iter().map(SyncIssue::from).collect())
    }

    /// Give a failed entry a fresh retry budget.
    pub async fn retry(&self, id: &OutboxEntryId) -> Result<bool> {
        let reset = self.db.reset_outbox_entry(id).await?;
        if reset {
            tracing::info!(entry_id = %id, "Outbox entry queued for retry");
        }
        Ok(reset)
    }

    /// Drop an entry the user gave up on.
    pub async fn discard(&self, id: &OutboxEntryId) -> Result<bool> {
        let deleted = self.db.delete_outbox(id).await?;
        if deleted {
            tracing::info!(entry_id = %id, "Outbox entry discarded");
        }
        Ok(deleted)
    }

    /// Pending and in-progress entries for a user, re-emitted after every
    /// journal mutation. The stream ends if the database fails.
    pub fn observe_pending_by_user(
        &self,
        user_id: impl Into<String>,
    ) -> BoxStream<'static, Vec<OutboxEntry>> {
        let db = self.db.clone();
        let user_id = user_id.into();
        let mut revisions = db.subscribe_outbox();
        revisions.mark_changed();

        stream::unfold(
            (db, user_id, revisions),
            |(db, user_id, mut revisions)| async move {
                revisions.changed().await.ok()?;
                match db.pending_by_user(&user_id).await {
                    Ok(entries) => Some((entries, (db, user_id, revisions))),
                    Err(error) => {
                        tracing::error!(%user_id, %error, "Stopped observing outbox");
                        None
                    }
                }
            },
        )
        .boxed()
    }
}
