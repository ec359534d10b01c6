use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only audit entry. Never updated once written.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Correlates the entry to an access request, when there is one.
    pub request_id: Option<Uuid>,
    pub actor: String,
    pub action: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        request_id: Option<Uuid>,
        actor: &str,
        action: &str,
        metadata: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            actor: actor.to_string(),
            action: action.to_string(),
            metadata,
            created_at,
        }
    }
}
