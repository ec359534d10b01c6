use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct AccessRequest {
    pub id: Uuid,
    /// Identity-provider user id the role is granted to.
    pub subject_id: String,
    pub requested_role: String,
    pub requester_email: Option<String>,
    pub approver_email: Option<String>,
    pub metadata: serde_json::Value,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub notify_count: i32,
}

impl AccessRequest {
    pub fn new(
        subject_id: &str,
        requested_role: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        let requester_email = metadata
            .get("requester_email")
            .and_then(|v| v.as_str())
            .map(String::from);
        let approver_email = metadata
            .get("approver_email")
            .and_then(|v| v.as_str())
            .map(String::from);

        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            requested_role: requested_role.to_string(),
            requester_email,
            approver_email,
            metadata,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
            last_notified_at: None,
            notify_count: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Error,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Error => "error",
            RequestStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "error" => Ok(RequestStatus::Error),
            "expired" => Ok(RequestStatus::Expired),
            other => Err(format!("unknown request status: {}", other)),
        }
    }
}
