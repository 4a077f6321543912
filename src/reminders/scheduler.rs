//! Delivery clock: claims due reminders once a second and sends them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::sender::{Sender, render_reminder};
use super::store::{ReminderStore, StoreError, now_ms};
use super::types::ReminderStatus;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on deliveries attempted per tick.
pub const BATCH_LIMIT: usize = 10;

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Lock held elsewhere, or the reminder changed state before delivery.
    pub skipped: usize,
}

pub struct Scheduler<S> {
    store: Arc<ReminderStore>,
    sender: Arc<S>,
}

impl<S: Sender + 'static> Scheduler<S> {
    pub fn new(store: Arc<ReminderStore>, sender: Arc<S>) -> Self {
        Self { store, sender }
    }

    /// Run one delivery pass.
    ///
    /// Send failures are recorded on the reminder and retried later. Store
    /// failures are returned to the caller.
    pub async fn tick(&self, now_ms: i64) -> Result<TickReport, StoreError> {
        let mut report = TickReport::default();
        let due = self.store.claim_due(now_ms, BATCH_LIMIT)?;
        if due.is_empty() {
            return Ok(report);
        }
        report.claimed = due.len();
        debug!("Claimed {} due reminder(s)", due.len());

        for rem in due {
            let Some(_guard) = self.store.locks().acquire_scoped(&rem.id, now_ms)? else {
                debug!("Reminder {} is being delivered elsewhere", rem.id);
                report.skipped += 1;
                continue;
            };

            // Canceled or delivered by someone else since we claimed it.
            let still_claimed = self
                .store
                .get(&rem.id)?
                .is_some_and(|cur| cur.status == ReminderStatus::Claimed);
            if !still_claimed {
                info!("Reminder {} changed state before delivery, skipping", rem.id);
                report.skipped += 1;
                continue;
            }

            let text = render_reminder(self.sender.as_ref(), rem.mention_id.as_deref(), &rem.text);
            match self.sender.send(&rem.delivery_target, &text).await {
                Ok(()) => {
                    self.store.mark_sent(&rem.id)?;
                    info!("Sent reminder {} to {:?}", rem.id, rem.delivery_target);
                    report.sent += 1;
                }
                Err(e) => {
                    self.store.mark_failed(&rem.id, &e)?;
                    warn!("Failed to deliver reminder {} (attempt {}): {}", rem.id, rem.attempts + 1, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Start ticking in the background.
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        let stop = Arc::new(Notify::new());
        let stop_rx = stop.clone();
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Reminder scheduler started");

            loop {
                tokio::select! {
                    biased;

                    _ = stop_rx.notified() => {
                        info!("Reminder scheduler stopped");
                        return Ok(());
                    }
                    _ = interval.tick() => {}
                }

                if let Err(e) = scheduler.tick(now_ms()).await {
                    error!("Reminder scheduler halted: {}", e);
                    return Err(e);
                }
            }
        });

        SchedulerHandle { stop, task }
    }
}

/// Control handle for a running scheduler.
pub struct SchedulerHandle {
    stop: Arc<Notify>,
    task: JoinHandle<Result<(), StoreError>>,
}

impl SchedulerHandle {
    /// Ask the loop to exit before its next tick.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Wait for the loop to exit. Returns the store error that halted it, if any.
    pub async fn join(&mut self) -> Result<(), StoreError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        }
    }
}
