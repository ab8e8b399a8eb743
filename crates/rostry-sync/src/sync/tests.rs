//! End-to-end sync cycle scenarios against a scripted remote store.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::Notify;

use super::*;
use crate::config::{DomainPolicy, SyncConfig};
use crate::error::{IssueClass, RemoteError};
use crate::models::{
    CacheEntry, EntityType, NewOutboxEntry, OutboxEntry, OutboxOperation, OutboxStatus, Product,
    PullCursor, Resolution,
};
use crate::services::DatabaseService;
use crate::state::SyncState;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Remote store double: scripted push outcomes, canned pull pages and a
/// call log.
#[derive(Default)]
struct ScriptedRemote {
    push_script: Mutex<VecDeque<Result<(), RemoteError>>>,
    pushes: Mutex<Vec<(EntityType, Value)>>,
    deletes: Mutex<Vec<(EntityType, String)>>,
    pages: Mutex<BTreeMap<String, Vec<Value>>>,
    fetch_error: Mutex<Option<RemoteError>>,
    hold: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl ScriptedRemote {
    fn script(&self, outcomes: impl IntoIterator<Item = Result<(), RemoteError>>) {
        self.push_script.lock().unwrap().extend(outcomes);
    }

    fn serve(&self, entity_type: &EntityType, records: Vec<Value>) {
        self.pages
            .lock()
            .unwrap()
            .insert(entity_type.as_str().to_string(), records);
    }

    fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    fn pushed_ids(&self) -> Vec<String> {
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, record)| record["id"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn push(
        &self,
        entity_type: &EntityType,
        records: Vec<Value>,
    ) -> Result<usize, RemoteError> {
        if let Some((started, release)) = &self.hold {
            started.notify_one();
            release.notified().await;
        }

        let count = records.len();
        self.pushes
            .lock()
            .unwrap()
            .extend(records.into_iter().map(|record| (entity_type.clone(), record)));
        let outcome = self
            .push_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        outcome.map(|()| count)
    }

    async fn delete(
        &self,
        entity_type: &EntityType,
        ids: Vec<String>,
    ) -> Result<usize, RemoteError> {
        let count = ids.len();
        self.deletes
            .lock()
            .unwrap()
            .extend(ids.into_iter().map(|id| (entity_type.clone(), id)));
        Ok(count)
    }

    async fn fetch_updated(
        &self,
        entity_type: &EntityType,
        after: &PullCursor,
        limit: usize,
    ) -> Result<Vec<Value>, RemoteError> {
        if let Some(error) = self.fetch_error.lock().unwrap().clone() {
            return Err(error);
        }
        let pages = self.pages.lock().unwrap();
        let mut feed: Vec<Value> = pages
            .get(entity_type.as_str())
            .map(|records| {
                records
                    .iter()
                    .filter(|record| {
                        after.admits(
                            record["updatedAt"].as_i64().unwrap_or(0),
                            record["id"].as_str().unwrap_or_default(),
                        )
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        feed.sort_by_key(|record| {
            (
                record["updatedAt"].as_i64().unwrap_or(0),
                record["id"].as_str().unwrap_or_default().to_string(),
            )
        });
        feed.truncate(limit);
        Ok(feed)
    }
}

fn test_config() -> SyncConfig {
    SyncConfig {
        retry_backoff_ms: 0,
        ..SyncConfig::default()
    }
}

struct Harness {
    manager: Arc<SyncManager>,
    remote: Arc<ScriptedRemote>,
    connectivity: Arc<StaticConnectivity>,
}

impl Harness {
    fn new(config: SyncConfig) -> Self {
        Self::with_remote(config, ScriptedRemote::default())
    }

    fn with_remote(config: SyncConfig, remote: ScriptedRemote) -> Self {
        init_tracing();
        let remote = Arc::new(remote);
        let connectivity = Arc::new(StaticConnectivity::online());
        let manager = SyncManager::builder(
            DatabaseService::open_in_memory().unwrap(),
            remote.clone(),
        )
        .connectivity(connectivity.clone())
        .config(config)
        .default_domains()
        .build()
        .unwrap();

        Self {
            manager: Arc::new(manager),
            remote,
            connectivity,
        }
    }

    fn journal(&self) -> &WriteJournal {
        self.manager.journal()
    }

    async fn enqueue_order(&self, order_id: &str, amount: f64) -> OutboxEntry {
        self.journal()
            .enqueue(NewOutboxEntry::new(
                "buyer-1",
                EntityType::Order,
                order_id,
                OutboxOperation::Create,
                order_json(order_id, amount, 1),
            ))
            .await
            .unwrap()
    }

    async fn status_of(&self, entry: &OutboxEntry) -> OutboxStatus {
        self.manager
            .database()
            .outbox_entry(&entry.id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

fn order_json(order_id: &str, amount: f64, updated_at: i64) -> Value {
    json!({
        "id": order_id,
        "buyerId": "buyer-1",
        "sellerId": "seller-1",
        "productId": "p1",
        "quantity": 1,
        "amount": amount,
        "status": "PLACED",
        "updatedAt": updated_at,
    })
}

fn product(name: &str, updated_at: i64) -> Product {
    Product {
        id: "p1".to_string(),
        seller_id: "seller-1".to_string(),
        name: name.to_string(),
        category: "BIRD".to_string(),
        price: 1_200.0,
        quantity: 4,
        updated_at,
        ..Product::default()
    }
}

#[tokio::test]
async fn drain_pushes_entries_in_enqueue_order() {
    let harness = Harness::new(test_config());
    let ids: Vec<String> = (1..=8).map(|i| format!("order-{i}")).collect();
    for id in &ids {
        harness.enqueue_order(id, 100.0).await;
    }

    let report = harness.manager.sync_all().await.unwrap();

    assert_eq!(report.status, SyncStatus::Success);
    assert_eq!(report.outbox.completed, 8);
    assert_eq!(harness.remote.pushed_ids(), ids);
}

#[tokio::test]
async fn one_cycle_claims_at_most_one_batch() {
    let harness = Harness::new(test_config());
    for i in 0..60 {
        harness.enqueue_order(&format!("order-{i}"), 10.0).await;
    }

    let report = harness.manager.sync_all().await.unwrap();

    assert_eq!(report.outbox.claimed, 50);
    assert_eq!(harness.remote.push_count(), 50);
    assert_eq!(harness.journal().pending_count().await.unwrap(), 10);
}

#[tokio::test]
async fn order_completes_on_third_attempt() {
    let harness = Harness::new(test_config());
    let entry = harness.enqueue_order("order-1", 500.0).await;
    harness.remote.script([
        Err(RemoteError::timeout("deadline exceeded")),
        Err(RemoteError::network("connection reset")),
        Ok(()),
    ]);

    let report = harness.manager.sync_all().await.unwrap();

    assert_eq!(harness.remote.push_count(), 3);
    assert_eq!(harness.status_of(&entry).await, OutboxStatus::Completed);
    assert_eq!(report.outbox.attempts, 3);
    assert_eq!(report.outbox.retried, 2);
    assert_eq!(report.status, SyncStatus::Success);
    assert_eq!(harness.remote.pushes.lock().unwrap()[0].1["amount"], 500.0);
}

#[tokio::test]
async fn persistent_failure_stops_at_max_retries() {
    let harness = Harness::new(test_config());
    let entry = harness.enqueue_order("order-1", 500.0).await;
    harness
        .remote
        .script((0..10).map(|_| Err(RemoteError::timeout("deadline exceeded"))));

    let report = harness.manager.sync_all().await.unwrap();
    assert_eq!(harness.remote.push_count(), 3);
    assert_eq!(report.outbox.failed, 1);
    assert_eq!(report.status, SyncStatus::Partial);
    assert_eq!(harness.status_of(&entry).await, OutboxStatus::Failed);

    // Failed entries are excluded from later automatic batches
    harness.manager.sync_all().await.unwrap();
    assert_eq!(harness.remote.push_count(), 3);

    let issues = harness.journal().sync_issues().await.unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].class, IssueClass::Network);
    assert_eq!(issues[0].entry.retry_count, 3);
}

#[tokio::test]
async fn prior_retries_count_towards_the_bound() {
    let harness = Harness::new(test_config());
    let entry = harness.enqueue_order("order-1", 500.0).await;
    harness
        .journal()
        .mark_failed(&entry.id, 2, &RemoteError::network("offline"))
        .await
        .unwrap();
    harness
        .remote
        .script([Err(RemoteError::timeout("deadline exceeded"))]);

    harness.manager.sync_all().await.unwrap();

    assert_eq!(harness.remote.push_count(), 1);
    assert_eq!(harness.status_of(&entry).await, OutboxStatus::Failed);
}

#[tokio::test]
async fn validation_rejection_fails_without_retry() {
    let harness = Harness::new(test_config());
    let rejected = harness.enqueue_order("order-1", -5.0).await;
    let accepted = harness.enqueue_order("order-2", 50.0).await;
    harness
        .remote
        .script([Err(RemoteError::validation("amount must be positive"))]);

    let report = harness.manager.sync_all().await.unwrap();

    assert_eq!(harness.remote.push_count(), 2);
    assert_eq!(harness.status_of(&rejected).await, OutboxStatus::Failed);
    assert_eq!(harness.status_of(&accepted).await, OutboxStatus::Completed);
    assert_eq!(report.status, SyncStatus::Partial);

    let issues = harness.journal().sync_issues().await.unwrap();
    assert_eq!(issues[0].class, IssueClass::Validation);
    assert_eq!(issues[0].message, "amount must be positive");

    // Manual retry puts it back in the queue
    harness.journal().retry(&rejected.id).await.unwrap();
    harness.manager.sync_all().await.unwrap();
    assert_eq!(harness.status_of(&rejected).await, OutboxStatus::Completed);
}

#[tokio::test]
async fn dirty_product_with_newer_remote_emits_one_conflict() {
    let harness = Harness::new(test_config());
    let mut conflicts = harness.manager.subscribe_conflicts();
    harness
        .manager
        .database()
        .cache_upsert_typed(&CacheEntry {
            data: product("Local", 100),
            dirty: true,
            conflicted: false,
            updated_at: 100,
        })
        .await
        .unwrap();
    harness.remote.serve(
        &EntityType::Product,
        vec![serde_json::to_value(product("Remote", 200)).unwrap()],
    );

    let report = harness.manager.sync_all().await.unwrap();

    assert_eq!(report.status, SyncStatus::Success);
    assert_eq!(report.conflicts(), 1);
    let conflict = conflicts.try_recv().unwrap();
    assert_eq!(conflict.entity_id, "p1");
    assert_eq!(conflict.conflicting_fields, vec!["name"]);
    assert_eq!(conflict.local_timestamp, 100);
    assert_eq!(conflict.remote_timestamp, 200);
    assert!(conflicts.try_recv().is_err());
}

#[tokio::test]
async fn keep_local_resolution_is_pushed_next_cycle() {
    let harness = Harness::new(test_config());
    let mut conflicts = harness.manager.subscribe_conflicts();
    let db = harness.manager.database();
    db.cache_upsert_typed(&CacheEntry {
        data: product("Local", 100),
        dirty: true,
        conflicted: false,
        updated_at: 100,
    })
    .await
    .unwrap();
    harness.remote.serve(
        &EntityType::Product,
        vec![serde_json::to_value(product("Remote", 200)).unwrap()],
    );
    harness.manager.sync_all().await.unwrap();
    let conflict = conflicts.try_recv().unwrap();

    harness
        .manager
        .resolve_conflict(&conflict, Resolution::KeepLocal, "seller-1")
        .await
        .unwrap();
    harness.manager.sync_all().await.unwrap();

    let pushes = harness.remote.pushes.lock().unwrap().clone();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].0, EntityType::Product);
    assert_eq!(pushes[0].1["name"], "Local");

    let row = db.cache_get_typed::<Product>("p1").await.unwrap().unwrap();
    assert!(!row.dirty);
    assert!(!row.conflicted);
}

#[tokio::test]
async fn offline_cycle_keeps_entries_pending() {
    let harness = Harness::new(test_config());
    harness.connectivity.set_online(false);
    let mut state = harness.manager.state();
    let entry = harness.enqueue_order("order-1", 500.0).await;

    let report = harness.manager.sync_all().await.unwrap();

    assert_eq!(report.status, SyncStatus::Offline);
    assert_eq!(harness.remote.push_count(), 0);
    assert_eq!(harness.journal().pending_count().await.unwrap(), 1);
    assert_eq!(harness.status_of(&entry).await, OutboxStatus::Pending);
    assert_eq!(*state.borrow_and_update(), SyncState::Offline);
}

#[tokio::test]
async fn offline_pull_only_for_opted_in_domains() {
    let config = test_config().with_domain_policy(
        &EntityType::Chat,
        DomainPolicy {
            pull_when_offline: true,
            ..DomainPolicy::default()
        },
    );
    let harness = Harness::new(config);
    harness.connectivity.set_online(false);

    let report = harness.manager.sync_all().await.unwrap();

    assert!(!report.domain(&EntityType::Chat).unwrap().skipped);
    assert!(report.domain(&EntityType::Order).unwrap().skipped);
}

#[tokio::test]
async fn unhandled_entity_types_complete_as_noop() {
    let harness = Harness::new(test_config());
    for entity_type in [EntityType::Post, EntityType::Other("AUCTION_BID".to_string())] {
        harness
            .journal()
            .enqueue(NewOutboxEntry::new(
                "user-1",
                entity_type,
                "x1",
                OutboxOperation::Create,
                json!({ "id": "x1" }),
            ))
            .await
            .unwrap();
    }

    let report = harness.manager.sync_all().await.unwrap();

    assert_eq!(report.outbox.noop, 2);
    assert_eq!(harness.remote.push_count(), 0);
    assert_eq!(harness.journal().pending_count().await.unwrap(), 0);
    assert_eq!(report.status, SyncStatus::Success);
}

#[tokio::test]
async fn custom_push_handler_receives_entries() {
    struct PostHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushHandler for PostHandler {
        async fn push(
            &self,
            _ctx: &SyncContext,
            entry: &OutboxEntry,
        ) -> Result<(), RemoteError> {
            self.seen.lock().unwrap().push(entry.entity_id.clone());
            Ok(())
        }
    }

    init_tracing();
    let handler = Arc::new(PostHandler {
        seen: Mutex::new(Vec::new()),
    });
    let manager = SyncManager::builder(
        DatabaseService::open_in_memory().unwrap(),
        Arc::new(ScriptedRemote::default()),
    )
    .push_handler(EntityType::Post, handler.clone())
    .build()
    .unwrap();
    manager
        .journal()
        .enqueue(NewOutboxEntry::new(
            "user-1",
            EntityType::Post,
            "post-1",
            OutboxOperation::Create,
            json!({ "id": "post-1", "text": "New hatch" }),
        ))
        .await
        .unwrap();

    let report = manager.sync_all().await.unwrap();

    assert_eq!(report.outbox.completed, 1);
    assert_eq!(*handler.seen.lock().unwrap(), vec!["post-1".to_string()]);
}

#[tokio::test]
async fn delete_entries_call_remote_delete() {
    let harness = Harness::new(test_config());
    let order: crate::models::Order =
        serde_json::from_value(order_json("order-1", 5.0, 1)).unwrap();
    harness
        .manager
        .database()
        .record_local_change(&order, OutboxOperation::Delete, "buyer-1")
        .await
        .unwrap();

    harness.manager.sync_all().await.unwrap();

    assert_eq!(
        *harness.remote.deletes.lock().unwrap(),
        vec![(EntityType::Order, "order-1".to_string())]
    );
}

#[tokio::test]
async fn local_writes_are_pushed_once_and_settle_the_cache() {
    let harness = Harness::new(test_config());
    let db = harness.manager.database();
    for id in ["order-1", "order-2"] {
        let order: crate::models::Order =
            serde_json::from_value(order_json(id, 5.0, 1)).unwrap();
        db.record_local_change(&order, OutboxOperation::Create, "buyer-1")
            .await
            .unwrap();
    }

    let report = harness.manager.sync_all().await.unwrap();
    assert_eq!(report.outbox.completed, 2);
    assert_eq!(harness.remote.pushed_ids(), vec!["order-1", "order-2"]);
    for id in ["order-1", "order-2"] {
        let row = db
            .cache_get_typed::<crate::models::Order>(id)
            .await
            .unwrap()
            .unwrap();
        assert!(!row.dirty);
    }

    harness.manager.sync_all().await.unwrap();
    assert_eq!(harness.remote.push_count(), 2);
    assert_eq!(harness.journal().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn purge_after_cycle_is_idempotent() {
    let config = SyncConfig {
        completed_retention_ms: 0,
        ..test_config()
    };
    let harness = Harness::new(config);
    harness.enqueue_order("order-1", 1.0).await;
    harness.enqueue_order("order-2", 2.0).await;

    let first = harness.manager.sync_all().await.unwrap();
    let second = harness.manager.sync_all().await.unwrap();

    assert_eq!(first.purged, 2);
    assert_eq!(second.purged, 0);
}

#[tokio::test]
async fn stale_claims_are_released_and_drained() {
    let harness = Harness::new(test_config());
    let entry = harness.enqueue_order("order-1", 1.0).await;
    // A cancelled cycle left this claimed
    harness.journal().claim_batch(10).await.unwrap();

    let report = harness.manager.sync_all().await.unwrap();

    assert_eq!(report.released, 1);
    assert_eq!(harness.status_of(&entry).await, OutboxStatus::Completed);
}

#[tokio::test]
async fn dirty_rows_are_pushed_for_opted_in_domains() {
    let config = test_config().with_domain_policy(
        &EntityType::Product,
        DomainPolicy {
            push_dirty: true,
            ..DomainPolicy::default()
        },
    );
    let harness = Harness::new(config);
    let db = harness.manager.database();
    db.cache_upsert_typed(&CacheEntry {
        data: product("Local", 10),
        dirty: true,
        conflicted: false,
        updated_at: 10,
    })
    .await
    .unwrap();

    let report = harness.manager.sync_all().await.unwrap();

    assert_eq!(report.domain(&EntityType::Product).unwrap().pushed, 1);
    let row = db.cache_get_typed::<Product>("p1").await.unwrap().unwrap();
    assert!(!row.dirty);
}

#[tokio::test]
async fn wifi_only_domain_waits_for_wifi() {
    let config = test_config().with_domain_policy(
        &EntityType::Transfer,
        DomainPolicy {
            wifi_only: true,
            ..DomainPolicy::default()
        },
    );
    let harness = Harness::new(config);
    harness.connectivity.set_wifi(false);

    let report = harness.manager.sync_all().await.unwrap();
    assert!(report.domain(&EntityType::Transfer).unwrap().skipped);
    assert!(!report.domain(&EntityType::Order).unwrap().skipped);
}

#[tokio::test]
async fn pull_failure_is_isolated_in_report() {
    let harness = Harness::new(test_config());
    *harness.remote.fetch_error.lock().unwrap() = Some(RemoteError::network("unreachable"));
    harness.enqueue_order("order-1", 1.0).await;

    let report = harness.manager.sync_all().await.unwrap();

    assert_eq!(report.outbox.completed, 1);
    assert!(report.domains.iter().all(|domain| domain.error.is_some()));
    assert_eq!(report.status, SyncStatus::Partial);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_cycle_is_skipped() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let remote = ScriptedRemote {
        hold: Some((started.clone(), release.clone())),
        ..ScriptedRemote::default()
    };
    let harness = Harness::with_remote(test_config(), remote);
    harness.enqueue_order("order-1", 1.0).await;

    let manager = harness.manager.clone();
    let first = tokio::spawn(async move { manager.sync_all().await });
    started.notified().await;

    assert!(harness.manager.is_syncing());
    let second = harness.manager.sync_all().await.unwrap();
    assert_eq!(second.status, SyncStatus::Skipped);

    release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status, SyncStatus::Success);
    assert_eq!(harness.remote.push_count(), 1);
}

#[tokio::test]
async fn background_trigger_runs_a_cycle() {
    let harness = Harness::new(test_config());
    harness.enqueue_order("order-1", 1.0).await;
    let mut state = harness.manager.state();

    let background = harness.manager.spawn_periodic();
    background.trigger(SyncTrigger::ConnectivityRegained);

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|state| *state == SyncState::Synced),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(background.is_running());

    background.shutdown().await;
    assert_eq!(harness.remote.push_count(), 1);
}
