//! In-process store used when no `DATABASE_URL` is configured, and by tests.
//!
//! Conditional updates run while holding the entry's shard lock, which gives
//! the same compare-and-set guarantee the Postgres `UPDATE … WHERE` provides.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AuditSink, RequestStore, TokenStore};
use crate::errors::StorageError;
use crate::models::audit::AuditRecord;
use crate::models::request::{AccessRequest, RequestStatus};
use crate::models::token::ApprovalToken;

#[derive(Clone, Default)]
pub struct MemoryStore {
    requests: Arc<DashMap<Uuid, AccessRequest>>,
    tokens: Arc<DashMap<String, ApprovalToken>>,
    audit: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every audit record written so far, in insertion order.
    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit.lock().await.clone()
    }

    pub fn tokens_for_request(&self, request_id: Uuid) -> Vec<ApprovalToken> {
        self.tokens
            .iter()
            .filter(|t| t.request_id == request_id)
            .map(|t| t.value().clone())
            .collect()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_token(&self, token: &ApprovalToken) -> Result<(), StorageError> {
        match self.tokens.entry(token.jti.clone()) {
            Entry::Occupied(_) => Err(StorageError::Backend(format!("duplicate jti {}", token.jti))),
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
                Ok(())
            }
        }
    }

    async fn get_token(&self, jti: &str) -> Result<Option<ApprovalToken>, StorageError> {
        Ok(self.tokens.get(jti).map(|t| t.value().clone()))
    }

    async fn mark_token_used(&self, jti: &str, at: DateTime<Utc>) -> Result<bool, StorageError> {
        let Some(mut token) = self.tokens.get_mut(jti) else {
            return Ok(false);
        };
        if token.used_at.is_some() {
            return Ok(false);
        }
        token.used_at = Some(at);
        Ok(true)
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert_request(&self, request: &AccessRequest) -> Result<(), StorageError> {
        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<AccessRequest>, StorageError> {
        Ok(self.requests.get(&id).map(|r| r.value().clone()))
    }

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> Result<Vec<AccessRequest>, StorageError> {
        let mut rows: Vec<AccessRequest> = self
            .requests
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn transition_request(
        &self,
        id: Uuid,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let Some(mut req) = self.requests.get_mut(&id) else {
            return Ok(false);
        };
        if req.status != RequestStatus::Pending {
            return Ok(false);
        }
        req.status = to;
        req.updated_at = at;
        Ok(true)
    }

    async fn list_pending_created_before(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<AccessRequest>, StorageError> {
        let mut rows: Vec<AccessRequest> = self
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending && r.created_at <= created_before)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn claim_notification(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        let Some(mut req) = self.requests.get_mut(&id) else {
            return Ok(false);
        };
        if req.status != RequestStatus::Pending {
            return Ok(false);
        }
        let eligible = match (req.last_notified_at, cutoff) {
            (None, _) => true,
            (Some(last), Some(cutoff)) => last <= cutoff,
            (Some(_), None) => false,
        };
        if !eligible {
            return Ok(false);
        }
        req.last_notified_at = Some(now);
        req.notify_count += 1;
        Ok(true)
    }

    async fn release_notification(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        let Some(mut req) = self.requests.get_mut(&id) else {
            return Ok(false);
        };
        if req.last_notified_at != Some(claimed_at) {
            return Ok(false);
        }
        req.last_notified_at = previous;
        req.notify_count = (req.notify_count - 1).max(0);
        Ok(true)
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StorageError> {
        self.audit.lock().await.push(record.clone());
        Ok(())
    }

    async fn audit_trail(&self, request_id: Uuid) -> Result<Vec<AuditRecord>, StorageError> {
        Ok(self
            .audit
            .lock()
            .await
            .iter()
            .filter(|r| r.request_id == Some(request_id))
            .cloned()
            .collect())
    }
}
