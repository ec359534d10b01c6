//! Background job: re-notify approvers about stale pending requests.
//!
//! Each tick selects pending requests older than the staleness threshold and
//! re-enters the notify path for those not notified within the reminder
//! interval. Only `last_notified_at`/`notify_count` change; status never does.

use chrono::Duration;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::errors::StorageError;
use crate::workflow::{ApprovalService, NotifyKind, NotifyOutcome};

/// Per-tick counts, mostly for logs and the `remind` CLI command.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderReport {
    pub scanned: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct ReminderScheduler {
    service: Arc<ApprovalService>,
    /// Minimum age of a pending request before it is reminder-eligible.
    staleness: Duration,
    /// Minimum gap between two notifications of the same request.
    interval: Duration,
}

impl ReminderScheduler {
    pub fn new(service: Arc<ApprovalService>, staleness: Duration, interval: Duration) -> Self {
        Self {
            service,
            staleness,
            interval,
        }
    }

    /// Run the scan once.
    pub async fn tick(&self) -> Result<ReminderReport, StorageError> {
        let now = self.service.clock().now();
        let stale = self
            .service
            .pending_created_before(now - self.staleness)
            .await?;
        // every claim in this tick is stamped with the tick's own time
        let kind = NotifyKind::Reminder {
            at: now,
            cutoff: now - self.interval,
        };

        let mut report = ReminderReport {
            scanned: stale.len(),
            ..Default::default()
        };
        for request in &stale {
            match self.service.notify_approver(request, kind).await {
                Ok(NotifyOutcome::Sent) => {
                    report.sent += 1;
                    crate::metrics::reminder("sent");
                }
                Ok(NotifyOutcome::Skipped) => report.skipped += 1,
                Ok(NotifyOutcome::DeliveryFailed) => {
                    report.failed += 1;
                    crate::metrics::reminder("failed");
                }
                Err(e) => {
                    report.failed += 1;
                    crate::metrics::reminder("failed");
                    warn!(request_id = %request.id, error = %e, "reminder failed");
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                sent = report.sent,
                skipped = report.skipped,
                failed = report.failed,
                "reminder tick complete"
            );
        } else {
            debug!("reminder tick: nothing stale");
        }
        Ok(report)
    }

    /// Spawn the periodic loop. The tick is awaited inside the loop, so an
    /// overrunning tick delays the next one instead of overlapping it.
    pub fn spawn(self, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.tick().await {
                    tracing::error!("reminder job failed: {}", e);
                }
            }
        })
    }
}
