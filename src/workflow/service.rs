use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use super::state_machine::RequestStateMachine;
use crate::audit::Auditor;
use crate::clock::Clock;
use crate::errors::{StateError, StorageError, WorkflowError};
use crate::grant::RoleGrantService;
use crate::models::audit::AuditRecord;
use crate::models::request::{AccessRequest, RequestStatus};
use crate::models::token::TokenAction;
use crate::notification::dispatcher::{NotificationDispatcher, RetryPolicy};
use crate::notification::templates::{self, ApprovalLinks};
use crate::notification::MailChannel;
use crate::store::{ApprovalStore, RequestStore};
use crate::tokens::{TokenCodec, TokenIssuer, TokenValidator};

/// Deployment-level knobs for [`ApprovalService`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Public base URL; callback links are `{app_base}/callback?token=…`.
    pub app_base: Url,
    pub token_ttl: Duration,
    /// Recipient when a request carries no `approver_email`.
    pub default_approver: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedRequest {
    pub request_id: Uuid,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    /// First notification at creation time.
    Initial,
    /// Re-notification stamped `at`; skipped unless the last one was at or
    /// before `cutoff`.
    Reminder {
        at: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// Another tick or instance already holds the notification slot.
    Skipped,
    DeliveryFailed,
}

/// Entry point of the approval workflow: creation, notification, token
/// callbacks and admin decisions.
#[derive(Clone)]
pub struct ApprovalService {
    requests: Arc<dyn RequestStore>,
    issuer: TokenIssuer,
    validator: TokenValidator,
    machine: RequestStateMachine,
    dispatcher: NotificationDispatcher,
    auditor: Auditor,
    clock: Arc<dyn Clock>,
    settings: ServiceSettings,
}

impl ApprovalService {
    pub fn new<S: ApprovalStore + 'static>(
        store: Arc<S>,
        codec: Arc<TokenCodec>,
        grant: Arc<dyn RoleGrantService>,
        channel: Arc<dyn MailChannel>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        let auditor = Auditor::new(store.clone(), clock.clone());
        Self {
            requests: store.clone(),
            issuer: TokenIssuer::new(codec.clone(), store.clone(), clock.clone()),
            validator: TokenValidator::new(codec, store.clone(), clock.clone()),
            machine: RequestStateMachine::new(store, grant, clock.clone()),
            dispatcher: NotificationDispatcher::new(channel, retry, auditor.clone()),
            auditor,
            clock,
            settings,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn mail_channel(&self) -> &'static str {
        self.dispatcher.channel_name()
    }

    pub async fn create_request(
        &self,
        subject_id: &str,
        requested_role: &str,
        metadata: serde_json::Value,
    ) -> Result<CreatedRequest, WorkflowError> {
        let request = AccessRequest::new(subject_id, requested_role, metadata, self.clock.now());
        self.requests.insert_request(&request).await?;

        tracing::info!(
            request_id = %request.id,
            subject_id = %request.subject_id,
            role = %request.requested_role,
            "access request created"
        );
        self.auditor
            .record(
                Some(request.id),
                request.requester_email.as_deref().unwrap_or("system"),
                "request_created",
                serde_json::json!({
                    "subject_id": request.subject_id,
                    "requested_role": request.requested_role,
                }),
            )
            .await;

        match self.notify_approver(&request, NotifyKind::Initial).await {
            Ok(_) => {}
            Err(e) => {
                tracing::error!(request_id = %request.id, error = %e, "failed to notify approver");
            }
        }

        Ok(CreatedRequest {
            request_id: request.id,
            status: request.status,
        })
    }

    pub async fn get_request(&self, id: Uuid) -> Result<AccessRequest, WorkflowError> {
        Ok(self
            .requests
            .get_request(id)
            .await?
            .ok_or(StateError::NotFound)?)
    }

    pub async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> Result<Vec<AccessRequest>, StorageError> {
        self.requests.list_requests(status, limit).await
    }

    pub async fn audit_trail(&self, request_id: Uuid) -> Result<Vec<AuditRecord>, StorageError> {
        self.auditor.trail(request_id).await
    }

    pub async fn pending_created_before(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<AccessRequest>, StorageError> {
        self.requests.list_pending_created_before(created_before).await
    }

    /// Claim the notification slot, mint a fresh token pair and email the
    /// approver. Delivery failures are audited by the dispatcher and reported
    /// as [`NotifyOutcome::DeliveryFailed`], never as an error.
    ///
    /// `last_notified_at` and `notify_count` only stay bumped when the email
    /// went out; a failed mint or delivery hands the slot back.
    pub async fn notify_approver(
        &self,
        request: &AccessRequest,
        kind: NotifyKind,
    ) -> Result<NotifyOutcome, WorkflowError> {
        let (stamp, cutoff) = match kind {
            NotifyKind::Initial => (self.clock.now(), None),
            NotifyKind::Reminder { at, cutoff } => (at, Some(cutoff)),
        };
        if !self
            .requests
            .claim_notification(request.id, stamp, cutoff)
            .await?
        {
            tracing::debug!(request_id = %request.id, "notification slot already claimed");
            return Ok(NotifyOutcome::Skipped);
        }

        let outcome = self.deliver_prompt(request, kind).await;
        if !matches!(outcome, Ok(NotifyOutcome::Sent)) {
            self.release_slot(request, stamp).await;
        }
        outcome
    }

    async fn deliver_prompt(
        &self,
        request: &AccessRequest,
        kind: NotifyKind,
    ) -> Result<NotifyOutcome, WorkflowError> {
        let pair = self.issuer.mint_pair(request.id, self.settings.token_ttl).await?;
        let approve_url = self.callback_url(&pair.approve);
        let reject_url = self.callback_url(&pair.reject);
        let links = ApprovalLinks {
            approve_url: &approve_url,
            reject_url: &reject_url,
            expires_at: self.clock.now() + self.settings.token_ttl,
        };
        let reminder = matches!(kind, NotifyKind::Reminder { .. });
        let message = templates::approval_request(request, &links, reminder);
        let recipient = self.approver_for(request);

        match self.dispatcher.send(recipient, &message, Some(request.id)).await {
            Ok(_) => {
                tracing::info!(request_id = %request.id, to = %recipient, reminder, "approver notified");
                Ok(NotifyOutcome::Sent)
            }
            Err(e) => {
                tracing::warn!(request_id = %request.id, to = %recipient, error = %e, "approver notification failed");
                Ok(NotifyOutcome::DeliveryFailed)
            }
        }
    }

    async fn release_slot(&self, request: &AccessRequest, stamp: DateTime<Utc>) {
        match self
            .requests
            .release_notification(request.id, stamp, request.last_notified_at)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(request_id = %request.id, "notification slot changed before release")
            }
            Err(e) => {
                tracing::error!(request_id = %request.id, error = %e, "failed to release notification slot")
            }
        }
    }

    /// Handle an approve/reject link. The token is only consumed once the
    /// owning request is known to be pending.
    pub async fn redeem_callback(&self, token: &str) -> Result<RequestStatus, WorkflowError> {
        let claims = self.validator.validate(token).await?;
        let request = self.get_request(claims.request_id).await?;
        if !request.is_pending() {
            return Err(StateError::NotPending.into());
        }

        self.validator.redeem(&claims.jti).await?;
        let updated = self.apply(request.id, claims.action).await?;

        let actor = self.approver_for(&updated).to_string();
        self.auditor
            .record(
                Some(updated.id),
                &actor,
                updated.status.as_str(),
                serde_json::json!({ "via": "callback", "jti": claims.jti }),
            )
            .await;
        self.confirm_requester(&updated).await;
        Ok(updated.status)
    }

    /// Decide a request without a token.
    pub async fn admin_action(
        &self,
        request_id: Uuid,
        action: TokenAction,
    ) -> Result<RequestStatus, WorkflowError> {
        let updated = self.apply(request_id, action).await?;
        self.auditor
            .record(
                Some(updated.id),
                "admin",
                updated.status.as_str(),
                serde_json::json!({ "via": "admin" }),
            )
            .await;
        self.confirm_requester(&updated).await;
        Ok(updated.status)
    }

    /// Move a stale pending request to `expired`.
    pub async fn expire(&self, request_id: Uuid) -> Result<RequestStatus, WorkflowError> {
        let updated = self.machine.expire(request_id).await?;
        self.auditor
            .record(Some(updated.id), "system", "expired", serde_json::json!({}))
            .await;
        Ok(updated.status)
    }

    async fn apply(
        &self,
        request_id: Uuid,
        action: TokenAction,
    ) -> Result<AccessRequest, WorkflowError> {
        match action {
            TokenAction::Approve => self.machine.approve(request_id).await,
            TokenAction::Reject => self.machine.reject(request_id).await,
        }
    }

    async fn confirm_requester(&self, request: &AccessRequest) {
        let Some(to) = request.requester_email.as_deref() else {
            return;
        };
        let message = templates::decision_confirmation(request, request.status);
        if let Err(e) = self.dispatcher.send(to, &message, Some(request.id)).await {
            tracing::warn!(request_id = %request.id, to, error = %e, "requester confirmation failed");
        }
    }

    fn approver_for<'a>(&'a self, request: &'a AccessRequest) -> &'a str {
        request
            .approver_email
            .as_deref()
            .unwrap_or(&self.settings.default_approver)
    }

    fn callback_url(&self, token: &str) -> String {
        let mut url = self.settings.app_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("callback");
        }
        url.query_pairs_mut().clear().append_pair("token", token);
        url.to_string()
    }
}
