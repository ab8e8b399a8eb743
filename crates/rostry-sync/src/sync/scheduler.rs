//! Background sync loop: periodic ticks plus explicit wake-ups.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::sync::manager::SyncManager;
use crate::sync::report::SyncReport;

/// Why a cycle was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Explicit request such as pull-to-refresh
    Manual,
    /// The platform reported the network is back
    ConnectivityRegained,
    Periodic,
}

#[derive(Default)]
struct Signals {
    wake: Notify,
    shutdown: Notify,
    pending: StdMutex<Option<SyncTrigger>>,
}

impl Signals {
    fn take_pending(&self) -> SyncTrigger {
        self.pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.take())
            .unwrap_or(SyncTrigger::Manual)
    }
}

/// Handle to a running background loop.
pub struct BackgroundSync {
    signals: Arc<Signals>,
    task: JoinHandle<()>,
}

impl BackgroundSync {
    /// Wake the loop. Triggers arriving while a cycle runs collapse into one
    /// follow-up cycle.
    pub fn trigger(&self, trigger: SyncTrigger) {
        if let Ok(mut pending) = self.signals.pending.lock() {
            *pending = Some(trigger);
        }
        self.signals.wake.notify_one();
    }

    /// Stop the loop after the current cycle and wait for it to exit.
    pub async fn shutdown(self) {
        self.signals.shutdown.notify_one();
        if let Err(error) = self.task.await {
            tracing::error!(%error, "Background sync task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl SyncManager {
    /// Spawn the background loop with the configured period.
    pub fn spawn_periodic(self: &Arc<Self>) -> BackgroundSync {
        self.spawn_background(self.config().periodic_interval())
    }

    /// Spawn the background loop on the current tokio runtime.
    pub fn spawn_background(self: &Arc<Self>, interval: Duration) -> BackgroundSync {
        let signals = Arc::new(Signals::default());
        let manager = Arc::clone(self);
        let loop_signals = Arc::clone(&signals);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                let trigger = tokio::select! {
                    biased;
                    () = loop_signals.shutdown.notified() => break,
                    () = loop_signals.wake.notified() => loop_signals.take_pending(),
                    _ = ticker.tick() => SyncTrigger::Periodic,
                };

                tracing::info!(?trigger, "Background sync triggered");
                match manager.sync_all().await {
                    Ok(report) => log_report(&report),
                    Err(error) => tracing::error!(%error, "Background sync failed"),
                }
            }
            tracing::info!("Background sync stopped");
        });

        BackgroundSync { signals, task }
    }
}

fn log_report(report: &SyncReport) {
    tracing::debug!(
        status = ?report.status,
        claimed = report.outbox.claimed,
        purged = report.purged,
        "Background sync cycle done"
    );
}
