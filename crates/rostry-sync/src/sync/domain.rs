//! Per-domain push handlers and pull/push reconciliation.
//!
//! Outbox entries carry an [`EntityType`] tag and a JSON payload. The sync
//! manager looks up a [`PushHandler`] by tag; a missing handler means the
//! entry is completed as a no-op. [`TypedDomain`] is the standard handler for
//! every [`SyncEntity`] and also drives that domain's pull and dirty-row push.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{Error, RemoteError, Result};
use crate::models::{
    CacheEntry, EntityType, OutboxEntry, OutboxOperation, Resolution, SyncConflict, SyncEntity,
};
use crate::services::DatabaseService;
use crate::sync::conflict::{detect, partial_merge};
use crate::sync::remote::RemoteStore;
use crate::util::now_millis;

/// Shared collaborators handed to handlers and domains.
#[derive(Clone)]
pub struct SyncContext {
    pub db: DatabaseService,
    pub remote: Arc<dyn RemoteStore>,
    pub conflicts: broadcast::Sender<SyncConflict>,
}

/// Delivers one journalled mutation to the remote store.
#[async_trait]
pub trait PushHandler: Send + Sync {
    async fn push(
        &self,
        ctx: &SyncContext,
        entry: &OutboxEntry,
    ) -> std::result::Result<(), RemoteError>;
}

/// Counts from one domain pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullOutcome {
    /// Remote rows written to the cache
    pub applied: usize,
    /// Conflicts emitted
    pub conflicts: usize,
    /// Dirty local rows kept because they were not older than the remote
    pub kept_local: usize,
    /// Remote rows that could not be decoded
    pub rejected: usize,
}

/// Pull, dirty-row push and conflict resolution for one domain.
#[async_trait]
pub trait DomainSync: Send + Sync {
    fn entity_type(&self) -> EntityType;

    /// Fetch one page of remote changes since the stored cursor and apply it.
    async fn pull(&self, ctx: &SyncContext, page_size: usize) -> Result<PullOutcome>;

    /// Push dirty rows that have no outbox entry. Returns rows pushed.
    async fn push_dirty(&self, ctx: &SyncContext, batch_size: usize) -> Result<usize>;

    /// Commit the user's choice for a conflict on this domain.
    async fn resolve(
        &self,
        ctx: &SyncContext,
        conflict: &SyncConflict,
        resolution: Resolution,
        user_id: &str,
    ) -> Result<Option<OutboxEntry>>;
}

/// Standard handler for a typed entity.
pub struct TypedDomain<T> {
    _entity: PhantomData<fn() -> T>,
}

impl<T: SyncEntity> TypedDomain<T> {
    pub const fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }

    async fn apply_remote(
        &self,
        ctx: &SyncContext,
        remote: T,
        outcome: &mut PullOutcome,
    ) -> Result<()> {
        let entity_type = T::entity_type();
        let local = ctx.db.cache_get_typed::<T>(remote.id()).await?;

        let Some(local) = local else {
            ctx.db.cache_upsert_typed(&clean(remote)).await?;
            outcome.applied += 1;
            return Ok(());
        };

        if !local.dirty {
            ctx.db.cache_upsert_typed(&clean(remote)).await?;
            outcome.applied += 1;
            return Ok(());
        }

        if remote.updated_at() <= local.updated_at {
            tracing::debug!(
                entity_type = %entity_type,
                entity_id = remote.id(),
                "Keeping newer local row"
            );
            outcome.kept_local += 1;
            return Ok(());
        }

        match detect(&local, &remote)? {
            Some(conflict) => {
                tracing::warn!(
                    entity_type = %entity_type,
                    entity_id = %conflict.entity_id,
                    fields = ?conflict.conflicting_fields,
                    "Sync conflict detected"
                );
                let merged = partial_merge(&local.data, &remote);
                ctx.db
                    .cache_upsert_typed(&CacheEntry {
                        data: merged,
                        dirty: true,
                        conflicted: true,
                        updated_at: local.updated_at,
                    })
                    .await?;
                // No subscribers is fine; the row stays marked conflicted
                let _ = ctx.conflicts.send(conflict);
                outcome.conflicts += 1;
            }
            None => {
                // Remote already carries the local edits
                let dirty = ctx.db.has_open_entries(&entity_type, remote.id()).await?;
                let updated_at = remote.updated_at();
                ctx.db
                    .cache_upsert_typed(&CacheEntry {
                        data: remote,
                        dirty,
                        conflicted: false,
                        updated_at,
                    })
                    .await?;
                outcome.applied += 1;
            }
        }
        Ok(())
    }
}

impl<T: SyncEntity> Default for TypedDomain<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn clean<T: SyncEntity>(data: T) -> CacheEntry<T> {
    let updated_at = data.updated_at();
    CacheEntry {
        data,
        dirty: false,
        conflicted: false,
        updated_at,
    }
}

#[async_trait]
impl<T: SyncEntity> PushHandler for TypedDomain<T> {
    async fn push(
        &self,
        ctx: &SyncContext,
        entry: &OutboxEntry,
    ) -> std::result::Result<(), RemoteError> {
        let entity_type = T::entity_type();
        match entry.operation {
            OutboxOperation::Delete => {
                ctx.remote
                    .delete(&entity_type, vec![entry.entity_id.clone()])
                    .await?;
            }
            OutboxOperation::Create | OutboxOperation::Update => {
                // Reject payloads this client can no longer read before they reach the remote
                let record: T =
                    serde_json::from_value(entry.payload.clone()).map_err(|error| {
                        RemoteError::validation(format!(
                            "Unreadable {entity_type} payload: {error}"
                        ))
                    })?;
                let record = serde_json::to_value(&record)
                    .map_err(|error| RemoteError::validation(error.to_string()))?;
                ctx.remote.push(&entity_type, vec![record]).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T: SyncEntity> DomainSync for TypedDomain<T> {
    fn entity_type(&self) -> EntityType {
        T::entity_type()
    }

    async fn pull(&self, ctx: &SyncContext, page_size: usize) -> Result<PullOutcome> {
        let entity_type = T::entity_type();
        let since = ctx
            .db
            .cursor(&entity_type)
            .await?
            .map(|cursor| cursor.position)
            .unwrap_or_default();

        let page = ctx
            .remote
            .fetch_updated(&entity_type, &since, page_size)
            .await?;
        tracing::debug!(
            domain = %entity_type,
            since = since.updated_at,
            since_id = ?since.entity_id,
            fetched = page.len(),
            "Pulled remote page"
        );

        let mut outcome = PullOutcome::default();
        let mut cursor = since.clone();
        for raw in page {
            let remote: T = match serde_json::from_value(raw) {
                Ok(remote) => remote,
                Err(error) => {
                    tracing::warn!(
                        domain = %entity_type,
                        %error,
                        "Skipping unreadable remote record"
                    );
                    outcome.rejected += 1;
                    continue;
                }
            };
            cursor.advance(remote.updated_at(), remote.id());
            self.apply_remote(ctx, remote, &mut outcome).await?;
        }

        if cursor != since {
            ctx.db.set_cursor(&entity_type, &cursor).await?;
        }
        Ok(outcome)
    }

    async fn push_dirty(&self, ctx: &SyncContext, batch_size: usize) -> Result<usize> {
        let entity_type = T::entity_type();
        let rows = ctx.db.pushable_dirty(&entity_type, batch_size).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let records = rows.iter().map(|row| row.entry.data.clone()).collect();
        ctx.remote.push(&entity_type, records).await?;
        // Rows edited while the push was in flight keep their dirty flag
        let cleaned = ctx.db.cache_mark_clean(&entity_type, &rows).await?;

        tracing::debug!(
            domain = %entity_type,
            pushed = rows.len(),
            cleaned,
            "Pushed dirty rows"
        );
        Ok(rows.len())
    }

    async fn resolve(
        &self,
        ctx: &SyncContext,
        conflict: &SyncConflict,
        resolution: Resolution,
        user_id: &str,
    ) -> Result<Option<OutboxEntry>> {
        match resolution {
            Resolution::KeepRemote => {
                let remote: T = serde_json::from_value(conflict.remote.clone())?;
                ctx.db.cache_upsert_typed(&clean(remote)).await?;
                Ok(None)
            }
            Resolution::KeepLocal => {
                let mut local: T = serde_json::from_value(conflict.local.clone())?;
                if local.id() != conflict.entity_id {
                    return Err(Error::InvalidInput(format!(
                        "conflict snapshot id '{}' does not match '{}'",
                        local.id(),
                        conflict.entity_id
                    )));
                }
                let bumped = now_millis().max(conflict.remote_timestamp.saturating_add(1));
                local.set_updated_at(bumped);
                let entry = ctx
                    .db
                    .record_local_change(&local, OutboxOperation::Update, user_id)
                    .await?;
                Ok(Some(entry))
            }
        }
    }
}
