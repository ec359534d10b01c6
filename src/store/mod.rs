pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::StorageError;
use crate::models::audit::AuditRecord;
use crate::models::request::{AccessRequest, RequestStatus};
use crate::models::token::ApprovalToken;

/// Durable record of issued approval tokens.
///
/// `mark_token_used` is the single-use primitive: it must be one storage-level
/// compare-and-set, never a read followed by an unconditional write.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_token(&self, token: &ApprovalToken) -> Result<(), StorageError>;

    async fn get_token(&self, jti: &str) -> Result<Option<ApprovalToken>, StorageError>;

    /// Flip `used_at` from null to `at`. Returns `false` if it was already set
    /// or the token does not exist.
    async fn mark_token_used(&self, jti: &str, at: DateTime<Utc>) -> Result<bool, StorageError>;
}

/// Durable record of access requests.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert_request(&self, request: &AccessRequest) -> Result<(), StorageError>;

    async fn get_request(&self, id: Uuid) -> Result<Option<AccessRequest>, StorageError>;

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> Result<Vec<AccessRequest>, StorageError>;

    /// Move a pending request to `to`. Returns `false` if the request is
    /// missing or no longer pending; nothing is written in that case.
    async fn transition_request(
        &self,
        id: Uuid,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Pending requests created at or before `created_before`, oldest first.
    async fn list_pending_created_before(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<AccessRequest>, StorageError>;

    /// Claim the notification slot of a pending request: sets
    /// `last_notified_at = now` and bumps `notify_count` only if the request is
    /// still pending and either was never notified or, given a `cutoff`, was
    /// last notified at or before it. Returns whether the claim succeeded.
    async fn claim_notification(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError>;

    /// Undo a claim whose notification was never delivered: restore
    /// `last_notified_at` to `previous` and decrement `notify_count`, but only
    /// while the row still carries the `claimed_at` stamp.
    async fn release_notification(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError>;
}

/// Append-only audit storage.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StorageError>;

    /// Records for one request, oldest first.
    async fn audit_trail(&self, request_id: Uuid) -> Result<Vec<AuditRecord>, StorageError>;
}

/// Everything the workflow needs from one backing store.
pub trait ApprovalStore: TokenStore + RequestStore + AuditSink {}

impl<T: TokenStore + RequestStore + AuditSink> ApprovalStore for T {}
