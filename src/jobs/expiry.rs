//! Background job: expire pending requests nobody decided within the TTL.

use chrono::Duration;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::errors::{StateError, StorageError, WorkflowError};
use crate::workflow::ApprovalService;

pub struct ExpirySweeper {
    service: Arc<ApprovalService>,
    ttl: Duration,
}

impl ExpirySweeper {
    pub fn new(service: Arc<ApprovalService>, ttl: Duration) -> Self {
        Self { service, ttl }
    }

    /// Expire every pending request older than the TTL. Returns how many
    /// were expired by this call.
    pub async fn tick(&self) -> Result<usize, StorageError> {
        let cutoff = self.service.clock().now() - self.ttl;
        let stale = self.service.pending_created_before(cutoff).await?;

        let mut expired = 0;
        for request in stale {
            match self.service.expire(request.id).await {
                Ok(_) => expired += 1,
                // decided between the scan and the update
                Err(WorkflowError::State(StateError::NotPending)) => {}
                Err(e) => tracing::warn!(request_id = %request.id, error = %e, "expiry failed"),
            }
        }

        if expired > 0 {
            tracing::info!(expired, "expired stale access requests");
        }
        Ok(expired)
    }

    pub fn spawn(self, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.tick().await {
                    tracing::error!("expiry job failed: {}", e);
                }
            }
        })
    }
}
