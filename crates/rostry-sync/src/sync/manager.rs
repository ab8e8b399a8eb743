//! Sync manager: one reconciliation cycle at a time.
//!
//! A cycle releases stale claims, drains the outbox (when online), pulls each
//! registered domain, pushes dirty rows for domains that opt in, then purges
//! old completed entries. Expected failures are recorded in the
//! [`SyncReport`]; only local storage faults surface as `Err`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::models::{
    EntityType, OutboxEntry, OutboxStatus, Resolution, SyncConflict, SyncEntity,
};
use crate::services::DatabaseService;
use crate::state::SyncState;
use crate::sync::connectivity::{Connectivity, StaticConnectivity};
use crate::sync::domain::{DomainSync, PushHandler, SyncContext, TypedDomain};
use crate::sync::journal::WriteJournal;
use crate::sync::remote::RemoteStore;
use crate::sync::report::{DomainReport, OutboxReport, SyncReport, SyncStatus};
use crate::util::now_millis;

/// Builder for [`SyncManager`].
pub struct SyncManagerBuilder {
    db: DatabaseService,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<dyn Connectivity>,
    config: SyncConfig,
    domains: Vec<Arc<dyn DomainSync>>,
    handlers: BTreeMap<EntityType, Arc<dyn PushHandler>>,
}

impl SyncManagerBuilder {
    #[must_use]
    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the standard handler for a typed entity: outbox pushes, pull
    /// and dirty-row push.
    #[must_use]
    pub fn domain<T: SyncEntity>(mut self) -> Self {
        let domain = Arc::new(TypedDomain::<T>::new());
        self.handlers.insert(T::entity_type(), domain.clone());
        self.domains.retain(|existing| existing.entity_type() != T::entity_type());
        self.domains.push(domain);
        self
    }

    /// Register users, products, orders, transfers and chats.
    #[must_use]
    pub fn default_domains(self) -> Self {
        use crate::models::{ChatMessage, Order, Product, Transfer, User};

        self.domain::<User>()
            .domain::<Product>()
            .domain::<Order>()
            .domain::<Transfer>()
            .domain::<ChatMessage>()
    }

    /// Register a push-only handler for an entity type without a typed model.
    #[must_use]
    pub fn push_handler(
        mut self,
        entity_type: EntityType,
        handler: Arc<dyn PushHandler>,
    ) -> Self {
        self.handlers.insert(entity_type, handler);
        self
    }

    pub fn build(self) -> Result<SyncManager> {
        self.config.validate()?;

        let (conflicts, _) = broadcast::channel(self.config.conflict_buffer_capacity);
        let (state, _) = watch::channel(SyncState::Idle);
        let journal = WriteJournal::from_config(self.db.clone(), &self.config);

        Ok(SyncManager {
            ctx: SyncContext {
                db: self.db,
                remote: self.remote,
                conflicts,
            },
            journal,
            connectivity: self.connectivity,
            config: self.config,
            domains: self.domains,
            handlers: self.handlers,
            state,
            cycle: Mutex::new(()),
        })
    }
}

/// Orchestrates outbox drain, per-domain pull and push, and purge.
pub struct SyncManager {
    ctx: SyncContext,
    journal: WriteJournal,
    connectivity: Arc<dyn Connectivity>,
    config: SyncConfig,
    domains: Vec<Arc<dyn DomainSync>>,
    handlers: BTreeMap<EntityType, Arc<dyn PushHandler>>,
    state: watch::Sender<SyncState>,
    cycle: Mutex<()>,
}

impl SyncManager {
    pub fn builder(db: DatabaseService, remote: Arc<dyn RemoteStore>) -> SyncManagerBuilder {
        SyncManagerBuilder {
            db,
            remote,
            connectivity: Arc::new(StaticConnectivity::online()),
            config: SyncConfig::default(),
            domains: Vec::new(),
            handlers: BTreeMap::new(),
        }
    }

    pub const fn journal(&self) -> &WriteJournal {
        &self.journal
    }

    pub const fn database(&self) -> &DatabaseService {
        &self.ctx.db
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Conflicts detected by later cycles.
    pub fn subscribe_conflicts(&self) -> broadcast::Receiver<SyncConflict> {
        self.ctx.conflicts.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Whether a cycle is running right now.
    pub fn is_syncing(&self) -> bool {
        self.cycle.try_lock().is_err()
    }

    /// Run one full cycle. Returns a skipped report if another cycle holds
    /// the single-flight guard.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let Ok(_guard) = self.cycle.try_lock() else {
            tracing::info!("Sync already in progress, skipping");
            return Ok(SyncReport::skipped(now_millis()));
        };

        self.state.send_replace(SyncState::Syncing);
        let result = self.run_cycle().await;
        let state = match &result {
            Ok(report) => match report.status {
                SyncStatus::Offline => SyncState::Offline,
                SyncStatus::Error => SyncState::Error,
                _ => SyncState::Synced,
            },
            Err(error) => {
                tracing::error!(%error, "Sync cycle aborted by storage failure");
                SyncState::Error
            }
        };
        self.state.send_replace(state);
        result
    }

    async fn run_cycle(&self) -> Result<SyncReport> {
        let mut report = SyncReport::new(now_millis());
        let online = self.connectivity.is_online();
        let on_wifi = self.connectivity.is_on_wifi();
        tracing::info!(online, on_wifi, "Sync cycle started");

        report.released = self.journal.release_stale_claims().await?;

        if online {
            self.drain_outbox(&mut report.outbox).await?;
        } else {
            tracing::warn!("Offline, skipping outbox push");
        }

        let mut domains: Vec<DomainReport> = self
            .domains
            .iter()
            .map(|domain| DomainReport::new(domain.entity_type()))
            .collect();

        for (domain, domain_report) in self.domains.iter().zip(domains.iter_mut()) {
            self.pull_domain(domain.as_ref(), domain_report, online, on_wifi)
                .await;
        }
        for (domain, domain_report) in self.domains.iter().zip(domains.iter_mut()) {
            self.push_domain(domain.as_ref(), domain_report, online, on_wifi)
                .await;
        }
        report.domains = domains;

        report.purged = self
            .journal
            .purge_completed_older_than(self.config.completed_retention())
            .await?;

        report.finish(online, now_millis());
        tracing::info!(
            status = ?report.status,
            completed = report.outbox.completed,
            failed = report.outbox.failed,
            pulled = report.pulled(),
            pushed = report.pushed(),
            conflicts = report.conflicts(),
            "Sync cycle finished"
        );
        Ok(report)
    }

    async fn drain_outbox(&self, report: &mut OutboxReport) -> Result<()> {
        let batch = self
            .journal
            .claim_batch(self.config.outbox_batch_size)
            .await?;
        report.claimed = batch.len();

        for entry in batch {
            let Some(handler) = self.handlers.get(&entry.entity_type) else {
                tracing::debug!(
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    "No handler registered, completing as no-op"
                );
                self.journal.mark_completed(&entry).await?;
                report.noop += 1;
                continue;
            };
            self.push_entry(handler.as_ref(), &entry, report).await?;
        }
        Ok(())
    }

    /// Push one entry, retrying transient failures within this cycle until
    /// it completes or runs out of retries.
    async fn push_entry(
        &self,
        handler: &dyn PushHandler,
        entry: &OutboxEntry,
        report: &mut OutboxReport,
    ) -> Result<()> {
        let mut retry_count = entry.retry_count;
        loop {
            report.attempts += 1;
            let Err(error) = handler.push(&self.ctx, entry).await else {
                self.journal.mark_completed(entry).await?;
                report.completed += 1;
                tracing::debug!(
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    attempt = retry_count + 1,
                    "Outbox entry pushed"
                );
                return Ok(());
            };

            retry_count += 1;
            if !error.is_transient() {
                self.journal
                    .mark_rejected(&entry.id, retry_count, &error)
                    .await?;
                report.failed += 1;
                tracing::error!(
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    %error,
                    "Outbox entry rejected by remote"
                );
                return Ok(());
            }

            let status = self
                .journal
                .mark_failed(&entry.id, retry_count, &error)
                .await?;
            if status == OutboxStatus::Failed {
                report.failed += 1;
                tracing::error!(
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    attempt = retry_count,
                    %error,
                    "Outbox entry exhausted retries"
                );
                return Ok(());
            }

            tracing::warn!(
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                attempt = retry_count,
                %error,
                "Outbox push failed, retrying"
            );
            tokio::time::sleep(self.config.retry_backoff()).await;

            if !self.journal.reclaim(&entry.id).await? {
                // Discarded or retried by the user while we were backing off
                report.deferred += 1;
                return Ok(());
            }
            report.retried += 1;
        }
    }

    async fn pull_domain(
        &self,
        domain: &dyn DomainSync,
        report: &mut DomainReport,
        online: bool,
        on_wifi: bool,
    ) {
        let entity_type = domain.entity_type();
        let policy = self.config.policy_for(&entity_type);
        if !policy.pull {
            return;
        }
        if (!online && !policy.pull_when_offline) || (policy.wifi_only && !on_wifi) {
            tracing::debug!(domain = %entity_type, "Skipping pull");
            report.skipped = true;
            return;
        }

        match domain.pull(&self.ctx, self.config.pull_page_size).await {
            Ok(outcome) => {
                report.pulled = outcome.applied;
                report.conflicts = outcome.conflicts;
            }
            Err(error) => {
                tracing::warn!(domain = %entity_type, %error, "Pull failed");
                report.pull_failed(error);
            }
        }
    }

    async fn push_domain(
        &self,
        domain: &dyn DomainSync,
        report: &mut DomainReport,
        online: bool,
        on_wifi: bool,
    ) {
        let entity_type = domain.entity_type();
        let policy = self.config.policy_for(&entity_type);
        if !policy.push_dirty {
            return;
        }
        if !online || (policy.wifi_only && !on_wifi) {
            report.skipped = true;
            return;
        }

        match domain
            .push_dirty(&self.ctx, self.config.pull_page_size)
            .await
        {
            Ok(pushed) => report.pushed = pushed,
            Err(error) => {
                tracing::warn!(domain = %entity_type, %error, "Dirty-row push failed");
                report.push_failed(error);
            }
        }
    }

    /// Commit the user's choice for a conflict. Keeping the local side
    /// re-enqueues it and returns the new outbox entry.
    pub async fn resolve_conflict(
        &self,
        conflict: &SyncConflict,
        resolution: Resolution,
        user_id: &str,
    ) -> Result<Option<OutboxEntry>> {
        let domain = self
            .domains
            .iter()
            .find(|domain| domain.entity_type() == conflict.entity_type)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "no sync domain registered for {}",
                    conflict.entity_type
                ))
            })?;

        tracing::info!(
            entity_type = %conflict.entity_type,
            entity_id = %conflict.entity_id,
            ?resolution,
            "Resolving sync conflict"
        );
        domain
            .resolve(&self.ctx, conflict, resolution, user_id)
            .await
    }
}
