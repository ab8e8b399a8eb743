//! Shared database service wrapper used by the journal and the sync manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::config::DrainOrder;
use crate::db::{
    CacheRecord, CacheRepository, CursorRepository, Database, OutboxRepository,
    SqliteCacheRepository, SqliteCursorRepository, SqliteOutboxRepository, SyncCursor,
};
use crate::error::RemoteError;
use crate::models::{
    CacheEntry, EntityType, NewOutboxEntry, OutboxEntry, OutboxEntryId, OutboxOperation,
    OutboxPriority, OutboxStatus, PullCursor, SyncEntity,
};
use crate::util::now_millis;
use crate::Result;

/// Thread-safe service for DB and repository operations.
///
/// Every method that changes the outbox bumps a revision counter so
/// observers can re-query.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    outbox_revision: Arc<watch::Sender<u64>>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %db_path.display(), "Opening sync database");
        let db = Database::open(&db_path)?;
        Ok(Self::from_database(db, Some(db_path)))
    }

    /// Open an in-memory database service (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::from_database(db, None))
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Self {
        let (outbox_revision, _) = watch::channel(0);
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            outbox_revision: Arc::new(outbox_revision),
        }
    }

    /// Filesystem location, `None` for in-memory services.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Receiver that changes after every outbox mutation.
    pub fn subscribe_outbox(&self) -> watch::Receiver<u64> {
        self.outbox_revision.subscribe()
    }

    fn bump_outbox(&self) {
        self.outbox_revision.send_modify(|revision| *revision += 1);
    }

    fn bump_outbox_if(&self, changed: bool) {
        if changed {
            self.bump_outbox();
        }
    }

    /// Write an entity to the cache as dirty and journal the mutation in one
    /// transaction. A delete removes the cache row instead.
    pub async fn record_local_change<T: SyncEntity>(
        &self,
        entity: &T,
        operation: OutboxOperation,
        user_id: &str,
    ) -> Result<OutboxEntry> {
        self.record_prioritized_change(entity, operation, user_id, OutboxPriority::Normal)
            .await
    }

    /// [`Self::record_local_change`] with an explicit drain priority.
    pub async fn record_prioritized_change<T: SyncEntity>(
        &self,
        entity: &T,
        operation: OutboxOperation,
        user_id: &str,
        priority: OutboxPriority,
    ) -> Result<OutboxEntry> {
        let payload = serde_json::to_value(entity)?;
        let entity_type = T::entity_type();
        let draft = NewOutboxEntry::new(
            user_id,
            entity_type.clone(),
            entity.id(),
            operation,
            payload.clone(),
        )
        .with_priority(priority);
        let entry = OutboxEntry::from_draft(draft, now_millis());

        {
            let db = self.db.lock().await;
            let conn = db.connection();
            let tx = conn.unchecked_transaction()?;
            let cache = SqliteCacheRepository::new(&tx);
            if operation == OutboxOperation::Delete {
                cache.delete(&entity_type, entity.id())?;
            } else {
                cache.upsert(
                    &entity_type,
                    entity.id(),
                    &CacheEntry {
                        data: payload,
                        dirty: true,
                        conflicted: false,
                        updated_at: entity.updated_at(),
                    },
                )?;
            }
            SqliteOutboxRepository::new(&tx).insert(&entry)?;
            tx.commit()?;
        }

        tracing::debug!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            operation = entry.operation.as_str(),
            "Recorded local change"
        );
        self.bump_outbox();
        Ok(entry)
    }

    // Outbox

    /// Append an entry built from a draft.
    pub async fn insert_outbox(&self, draft: NewOutboxEntry) -> Result<OutboxEntry> {
        let entry = OutboxEntry::from_draft(draft, now_millis());
        {
            let db = self.db.lock().await;
            SqliteOutboxRepository::new(db.connection()).insert(&entry)?;
        }
        self.bump_outbox();
        Ok(entry)
    }

    pub async fn outbox_entry(&self, id: &OutboxEntryId) -> Result<Option<OutboxEntry>> {
        let db = self.db.lock().await;
        SqliteOutboxRepository::new(db.connection()).get(id)
    }

    /// Atomically claim up to `limit` pending entries.
    pub async fn claim_outbox(&self, limit: usize, order: DrainOrder) -> Result<Vec<OutboxEntry>> {
        let claimed = {
            let db = self.db.lock().await;
            SqliteOutboxRepository::new(db.connection()).claim_pending(
                limit,
                order,
                now_millis(),
            )?
        };
        self.bump_outbox_if(!claimed.is_empty());
        Ok(claimed)
    }

    /// Re-claim one entry that was returned to pending between attempts.
    pub async fn reclaim_outbox_entry(&self, id: &OutboxEntryId) -> Result<bool> {
        let claimed = {
            let db = self.db.lock().await;
            SqliteOutboxRepository::new(db.connection()).claim(id, now_millis())?
        };
        self.bump_outbox_if(claimed);
        Ok(claimed)
    }

    /// Pending entries in drain order, without claiming them.
    pub async fn pending_outbox(
        &self,
        limit: usize,
        order: DrainOrder,
    ) -> Result<Vec<OutboxEntry>> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        match order {
            DrainOrder::Fifo => repo.get_pending(limit),
            DrainOrder::Prioritized => repo.get_pending_prioritized(limit),
        }
    }

    pub async fn update_outbox_status(
        &self,
        id: &OutboxEntryId,
        status: OutboxStatus,
    ) -> Result<bool> {
        let updated = {
            let db = self.db.lock().await;
            SqliteOutboxRepository::new(db.connection()).update_status(id, status, now_millis())?
        };
        self.bump_outbox_if(updated);
        Ok(updated)
    }

    pub async fn update_outbox_status_batch(
        &self,
        ids: &[OutboxEntryId],
        status: OutboxStatus,
    ) -> Result<usize> {
        let updated = {
            let db = self.db.lock().await;
            SqliteOutboxRepository::new(db.connection()).update_status_batch(
                ids,
                status,
                now_millis(),
            )?
        };
        self.bump_outbox_if(updated > 0);
        Ok(updated)
    }

    /// Mark an entry completed and clear the cache row's dirty flag once no
    /// other open entry targets the same entity.
    pub async fn complete_outbox_entry(&self, entry: &OutboxEntry) -> Result<bool> {
        let updated = {
            let db = self.db.lock().await;
            let conn = db.connection();
            let tx = conn.unchecked_transaction()?;
            let outbox = SqliteOutboxRepository::new(&tx);
            let updated = outbox.update_status(&entry.id, OutboxStatus::Completed, now_millis())?;
            if updated && !outbox.has_open_entries(&entry.entity_type, &entry.entity_id)? {
                let cache = SqliteCacheRepository::new(&tx);
                let settled = cache
                    .get(&entry.entity_type, &entry.entity_id)?
                    .filter(|row| row.dirty && !row.conflicted);
                if let Some(row) = settled {
                    let record = CacheRecord {
                        entity_id: entry.entity_id.clone(),
                        entry: row,
                    };
                    cache.mark_clean(&entry.entity_type, &[record])?;
                }
            }
            tx.commit()?;
            updated
        };
        self.bump_outbox_if(updated);
        Ok(updated)
    }

    pub async fn record_outbox_failure(
        &self,
        id: &OutboxEntryId,
        retry_count: u32,
        status: OutboxStatus,
        error: &RemoteError,
    ) -> Result<bool> {
        let updated = {
            let db = self.db.lock().await;
            SqliteOutboxRepository::new(db.connection()).record_failure(
                id,
                retry_count,
                status,
                error,
                now_millis(),
            )?
        };
        self.bump_outbox_if(updated);
        Ok(updated)
    }

    pub async fn reset_outbox_entry(&self, id: &OutboxEntryId) -> Result<bool> {
        let updated = {
            let db = self.db.lock().await;
            SqliteOutboxRepository::new(db.connection()).reset_retry_and_status(id)?
        };
        self.bump_outbox_if(updated);
        Ok(updated)
    }

    /// Return entries stranded in progress by an interrupted cycle.
    pub async fn release_in_progress(&self) -> Result<usize> {
        let released = {
            let db = self.db.lock().await;
            SqliteOutboxRepository::new(db.connection()).release_in_progress()?
        };
        self.bump_outbox_if(released > 0);
        Ok(released)
    }

    pub async fn outbox_by_status(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>> {
        let db = self.db.lock().await;
        SqliteOutboxRepository::new(db.connection()).list_by_status(status, limit)
    }

    pub async fn pending_by_user(&self, user_id: &str) -> Result<Vec<OutboxEntry>> {
        let db = self.db.lock().await;
        SqliteOutboxRepository::new(db.connection()).pending_by_user(user_id)
    }

    pub async fn count_outbox(&self, status: OutboxStatus) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteOutboxRepository::new(db.connection()).count_by_status(status)
    }

    pub async fn has_open_entries(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteOutboxRepository::new(db.connection()).has_open_entries(entity_type, entity_id)
    }

    pub async fn delete_outbox(&self, id: &OutboxEntryId) -> Result<bool> {
        let deleted = {
            let db = self.db.lock().await;
            SqliteOutboxRepository::new(db.connection()).delete(id)?
        };
        self.bump_outbox_if(deleted);
        Ok(deleted)
    }

    pub async fn purge_completed_before(&self, cutoff: i64) -> Result<usize> {
        let purged = {
            let db = self.db.lock().await;
            SqliteOutboxRepository::new(db.connection()).purge_completed_before(cutoff)?
        };
        self.bump_outbox_if(purged > 0);
        Ok(purged)
    }

    // Cache

    pub async fn cache_get(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Option<CacheEntry<Value>>> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).get(entity_type, entity_id)
    }

    pub async fn cache_get_typed<T: SyncEntity>(
        &self,
        entity_id: &str,
    ) -> Result<Option<CacheEntry<T>>> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).get_typed(entity_id)
    }

    pub async fn cache_upsert(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        entry: &CacheEntry<Value>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).upsert(entity_type, entity_id, entry)
    }

    pub async fn cache_upsert_typed<T: SyncEntity>(&self, entry: &CacheEntry<T>) -> Result<()> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).upsert_typed(entry)
    }

    pub async fn cache_updated_since(
        &self,
        entity_type: &EntityType,
        since: i64,
        limit: usize,
    ) -> Result<Vec<CacheRecord>> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).updated_since(entity_type, since, limit)
    }

    /// Dirty rows that are safe to push directly: not conflicted and not
    /// waiting on an outbox entry.
    pub async fn pushable_dirty(
        &self,
        entity_type: &EntityType,
        limit: usize,
    ) -> Result<Vec<CacheRecord>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let cache = SqliteCacheRepository::new(conn);
        let outbox = SqliteOutboxRepository::new(conn);

        let mut pushable = Vec::new();
        for record in cache.list_dirty(entity_type, usize::MAX)? {
            if pushable.len() == limit {
                break;
            }
            if record.entry.conflicted || outbox.has_open_entries(entity_type, &record.entity_id)? {
                continue;
            }
            pushable.push(record);
        }
        Ok(pushable)
    }

    /// Clear the dirty flag on pushed rows that were not edited since
    /// `records` was read.
    pub async fn cache_mark_clean(
        &self,
        entity_type: &EntityType,
        records: &[CacheRecord],
    ) -> Result<usize> {
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let cleaned = SqliteCacheRepository::new(&tx).mark_clean(entity_type, records)?;
        tx.commit()?;
        Ok(cleaned)
    }

    pub async fn cache_set_conflicted(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        conflicted: bool,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).set_conflicted(
            entity_type,
            entity_id,
            conflicted,
        )
    }

    pub async fn cache_delete(&self, entity_type: &EntityType, entity_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).delete(entity_type, entity_id)
    }

    // Cursors

    pub async fn cursor(&self, domain: &EntityType) -> Result<Option<SyncCursor>> {
        let db = self.db.lock().await;
        SqliteCursorRepository::new(db.connection()).get(domain)
    }

    pub async fn set_cursor(&self, domain: &EntityType, position: &PullCursor) -> Result<()> {
        let db = self.db.lock().await;
        SqliteCursorRepository::new(db.connection()).set(domain, position, now_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Order;
    use tempfile::tempdir;

    fn order(id: &str) -> Order {
        Order {
            id: id.to_string(),
            buyer_id: "buyer-1".to_string(),
            seller_id: "seller-1".to_string(),
            product_id: "p1".to_string(),
            quantity: 1,
            amount: 500.0,
            status: "PLACED".to_string(),
            updated_at: 10,
            ..Order::default()
        }
    }

    #[tokio::test]
    async fn record_local_change_writes_cache_and_journal() {
        let service = DatabaseService::open_in_memory().unwrap();

        let entry = service
            .record_local_change(&order("order-1"), OutboxOperation::Create, "buyer-1")
            .await
            .unwrap();

        let cached = service
            .cache_get_typed::<Order>("order-1")
            .await
            .unwrap()
            .unwrap();
        assert!(cached.dirty);
        assert_eq!(cached.data.amount, 500.0);

        let pending = service.pending_by_user("buyer-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, entry.id);
        assert_eq!(pending[0].payload["amount"], 500.0);
    }

    #[tokio::test]
    async fn record_local_delete_removes_cache_row() {
        let service = DatabaseService::open_in_memory().unwrap();
        let order = order("order-1");

        service
            .record_local_change(&order, OutboxOperation::Create, "buyer-1")
            .await
            .unwrap();
        service
            .record_local_change(&order, OutboxOperation::Delete, "buyer-1")
            .await
            .unwrap();

        assert!(service
            .cache_get(&EntityType::Order, "order-1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(service.count_outbox(OutboxStatus::Pending).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn completing_last_entry_clears_dirty() {
        let service = DatabaseService::open_in_memory().unwrap();
        let order = order("order-1");

        let first = service
            .record_local_change(&order, OutboxOperation::Create, "buyer-1")
            .await
            .unwrap();
        let second = service
            .record_local_change(&order, OutboxOperation::Update, "buyer-1")
            .await
            .unwrap();

        service.complete_outbox_entry(&first).await.unwrap();
        let row = service
            .cache_get(&EntityType::Order, "order-1")
            .await
            .unwrap()
            .unwrap();
        assert!(row.dirty, "second entry still open");

        service.complete_outbox_entry(&second).await.unwrap();
        let row = service
            .cache_get(&EntityType::Order, "order-1")
            .await
            .unwrap()
            .unwrap();
        assert!(!row.dirty);
    }

    #[tokio::test]
    async fn outbox_mutations_bump_revision() {
        let service = DatabaseService::open_in_memory().unwrap();
        let mut revisions = service.subscribe_outbox();
        let start = *revisions.borrow_and_update();

        service
            .record_local_change(&order("order-1"), OutboxOperation::Create, "buyer-1")
            .await
            .unwrap();

        assert!(revisions.has_changed().unwrap());
        assert!(*revisions.borrow_and_update() > start);
    }

    #[tokio::test]
    async fn pushable_dirty_skips_journalled_and_conflicted_rows() {
        let service = DatabaseService::open_in_memory().unwrap();

        service
            .record_local_change(&order("journalled"), OutboxOperation::Create, "buyer-1")
            .await
            .unwrap();
        for id in ["free", "conflicted"] {
            service
                .cache_upsert_typed(&CacheEntry {
                    data: order(id),
                    dirty: true,
                    conflicted: id == "conflicted",
                    updated_at: 10,
                })
                .await
                .unwrap();
        }

        let pushable = service
            .pushable_dirty(&EntityType::Order, 50)
            .await
            .unwrap();
        let ids: Vec<&str> = pushable.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["free"]);
    }

    #[tokio::test]
    async fn pending_outbox_follows_drain_order() {
        let service = DatabaseService::open_in_memory().unwrap();
        let low = service
            .record_prioritized_change(
                &order("low"),
                OutboxOperation::Create,
                "buyer-1",
                OutboxPriority::Low,
            )
            .await
            .unwrap();
        let high = service
            .record_prioritized_change(
                &order("high"),
                OutboxOperation::Create,
                "buyer-1",
                OutboxPriority::High,
            )
            .await
            .unwrap();

        let fifo = service.pending_outbox(10, DrainOrder::Fifo).await.unwrap();
        assert_eq!(fifo[0].id, low.id);
        let prioritized = service
            .pending_outbox(10, DrainOrder::Prioritized)
            .await
            .unwrap();
        assert_eq!(prioritized[0].id, high.id);

        let updated = service
            .update_outbox_status_batch(&[low.id, high.id], OutboxStatus::Completed)
            .await
            .unwrap();
        assert_eq!(updated, 2);
        assert!(service
            .update_outbox_status(&low.id, OutboxStatus::Failed)
            .await
            .unwrap());
        assert_eq!(service.count_outbox(OutboxStatus::Failed).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cache_rows_can_be_edited_directly() {
        let service = DatabaseService::open_in_memory().unwrap();
        let entry = CacheEntry {
            data: serde_json::json!({ "id": "t1" }),
            dirty: false,
            conflicted: false,
            updated_at: 5,
        };
        service
            .cache_upsert(&EntityType::Transfer, "t1", &entry)
            .await
            .unwrap();

        assert!(service
            .cache_set_conflicted(&EntityType::Transfer, "t1", true)
            .await
            .unwrap());
        let changed = service
            .cache_updated_since(&EntityType::Transfer, 4, 10)
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert!(changed[0].entry.conflicted);

        assert!(service
            .cache_delete(&EntityType::Transfer, "t1")
            .await
            .unwrap());
        assert!(!service
            .cache_delete(&EntityType::Transfer, "t1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn open_path_creates_parent_dirs() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("rostry.db");

        let service = DatabaseService::open_path(&db_path).unwrap();
        assert_eq!(service.path(), Some(db_path.as_path()));
        service
            .set_cursor(&EntityType::Product, &PullCursor::new(42, "p1"))
            .await
            .unwrap();
        assert_eq!(
            service
                .cursor(&EntityType::Product)
                .await
                .unwrap()
                .unwrap()
                .position,
            PullCursor::new(42, "p1")
        );
    }
}
