use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{AuditSink, RequestStore, TokenStore};
use crate::errors::StorageError;
use crate::models::audit::AuditRecord;
use crate::models::request::{AccessRequest, RequestStatus};
use crate::models::token::ApprovalToken;

const REQUEST_COLUMNS: &str = "id, subject_id, requested_role, requester_email, approver_email, metadata, status, created_at, updated_at, last_notified_at, notify_count";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// -- Token Operations --

#[async_trait]
impl TokenStore for PgStore {
    async fn insert_token(&self, token: &ApprovalToken) -> Result<(), StorageError> {
        sqlx::query(
            r#"INSERT INTO approval_tokens (jti, request_id, action, created_at, expires_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&token.jti)
        .bind(token.request_id)
        .bind(token.action)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(jti = %token.jti, "insert_token failed: {:?}", e);
            e
        })?;
        Ok(())
    }

    async fn get_token(&self, jti: &str) -> Result<Option<ApprovalToken>, StorageError> {
        let row = sqlx::query_as::<_, ApprovalToken>(
            "SELECT jti, request_id, action, created_at, expires_at, used_at FROM approval_tokens WHERE jti = $1",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_token_used(&self, jti: &str, at: DateTime<Utc>) -> Result<bool, StorageError> {
        // Single conditional UPDATE: concurrent redeemers race on the row lock,
        // only the first sees used_at IS NULL.
        let result = sqlx::query(
            "UPDATE approval_tokens SET used_at = $1 WHERE jti = $2 AND used_at IS NULL",
        )
        .bind(at)
        .bind(jti)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -- Request Operations --

#[async_trait]
impl RequestStore for PgStore {
    async fn insert_request(&self, request: &AccessRequest) -> Result<(), StorageError> {
        sqlx::query(
            r#"INSERT INTO access_requests (id, subject_id, requested_role, requester_email, approver_email, metadata, status, created_at, updated_at, last_notified_at, notify_count)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(request.id)
        .bind(&request.subject_id)
        .bind(&request.requested_role)
        .bind(&request.requester_email)
        .bind(&request.approver_email)
        .bind(&request.metadata)
        .bind(request.status)
        .bind(request.created_at)
        .bind(request.updated_at)
        .bind(request.last_notified_at)
        .bind(request.notify_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<AccessRequest>, StorageError> {
        let row = sqlx::query_as::<_, AccessRequest>(&format!(
            "SELECT {} FROM access_requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> Result<Vec<AccessRequest>, StorageError> {
        let rows = sqlx::query_as::<_, AccessRequest>(&format!(
            "SELECT {} FROM access_requests WHERE ($1::varchar IS NULL OR status = $1) ORDER BY created_at DESC LIMIT $2",
            REQUEST_COLUMNS
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn transition_request(
        &self,
        id: Uuid,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE access_requests SET status = $1, updated_at = $2 WHERE id = $3 AND status = 'pending'",
        )
        .bind(to)
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_pending_created_before(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<AccessRequest>, StorageError> {
        let rows = sqlx::query_as::<_, AccessRequest>(&format!(
            "SELECT {} FROM access_requests WHERE status = 'pending' AND created_at <= $1 ORDER BY created_at ASC",
            REQUEST_COLUMNS
        ))
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn claim_notification(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"UPDATE access_requests
               SET last_notified_at = $1, notify_count = notify_count + 1
               WHERE id = $2
                 AND status = 'pending'
                 AND (last_notified_at IS NULL OR last_notified_at <= $3)"#,
        )
        .bind(now)
        .bind(id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_notification(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"UPDATE access_requests
               SET last_notified_at = $1, notify_count = GREATEST(notify_count - 1, 0)
               WHERE id = $2 AND last_notified_at = $3"#,
        )
        .bind(previous)
        .bind(id)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -- Audit Log Operations --

#[async_trait]
impl AuditSink for PgStore {
    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"INSERT INTO audit_logs (id, request_id, actor, action, metadata, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(record.id)
        .bind(record.request_id)
        .bind(&record.actor)
        .bind(&record.action)
        .bind(&record.metadata)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit_trail(&self, request_id: Uuid) -> Result<Vec<AuditRecord>, StorageError> {
        let rows = sqlx::query_as::<_, AuditRecord>(
            "SELECT id, request_id, actor, action, metadata, created_at FROM audit_logs WHERE request_id = $1 ORDER BY created_at ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
