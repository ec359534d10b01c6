use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::StorageError;
use crate::models::audit::AuditRecord;
use crate::store::AuditSink;

/// Best-effort audit writer. Sink failures are logged and swallowed so they
/// never abort the workflow step that produced them.
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    pub async fn record(
        &self,
        request_id: Option<Uuid>,
        actor: &str,
        action: &str,
        metadata: serde_json::Value,
    ) {
        let entry = AuditRecord::new(request_id, actor, action, metadata, self.clock.now());
        if let Err(e) = self.sink.append_audit(&entry).await {
            tracing::error!(
                request_id = ?entry.request_id,
                action = %entry.action,
                "failed to write audit log: {}",
                e
            );
        } else {
            tracing::debug!(request_id = ?entry.request_id, action = %entry.action, "audit log recorded");
        }
    }

    pub async fn trail(&self, request_id: Uuid) -> Result<Vec<AuditRecord>, StorageError> {
        self.sink.audit_trail(request_id).await
    }
}
