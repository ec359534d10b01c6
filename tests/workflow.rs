//! End-to-end tests of the approval workflow against the in-memory store.
//!
//! A capturing mail channel stands in for the provider so the approve/reject
//! links can be pulled out of the rendered email, exactly as an approver
//! would click them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use accessgate::clock::ManualClock;
use accessgate::errors::{CollaboratorError, StateError, ValidationError, WorkflowError};
use accessgate::grant::RoleGrantService;
use accessgate::models::request::RequestStatus;
use accessgate::notification::dispatcher::RetryPolicy;
use accessgate::notification::{ChannelError, EmailMessage, MailChannel, SendReceipt};
use accessgate::store::memory::MemoryStore;
use accessgate::tokens::TokenCodec;
use accessgate::workflow::{ApprovalService, ServiceSettings};
use async_trait::async_trait;
use chrono::{Duration, Utc};

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, EmailMessage)>>,
}

impl Outbox {
    fn last_to(&self, recipient: &str) -> EmailMessage {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == recipient)
            .map(|(_, m)| m.clone())
            .expect("an email to the recipient")
    }

    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MailChannel for Outbox {
    fn name(&self) -> &'static str {
        "outbox"
    }

    async fn send(
        &self,
        to: &str,
        message: &EmailMessage,
        _correlation_id: Option<&str>,
    ) -> Result<SendReceipt, ChannelError> {
        self.sent.lock().unwrap().push((to.to_string(), message.clone()));
        Ok(SendReceipt::default())
    }
}

#[derive(Default)]
struct RecordingGrant {
    calls: Mutex<Vec<(String, String)>>,
    failures_left: AtomicUsize,
}

#[async_trait]
impl RoleGrantService for RecordingGrant {
    async fn assign(&self, subject_id: &str, role: &str) -> Result<(), CollaboratorError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CollaboratorError::GrantFailed("identity provider unavailable".into()));
        }
        self.calls
            .lock()
            .unwrap()
            .push((subject_id.to_string(), role.to_string()));
        Ok(())
    }
}

struct World {
    service: Arc<ApprovalService>,
    store: MemoryStore,
    outbox: Arc<Outbox>,
    grant: Arc<RecordingGrant>,
    clock: Arc<ManualClock>,
}

fn world() -> World {
    let store = MemoryStore::new();
    let outbox = Arc::new(Outbox::default());
    let grant = Arc::new(RecordingGrant::default());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = Arc::new(ApprovalService::new(
        Arc::new(store.clone()),
        Arc::new(TokenCodec::new("integration-secret", "iam-email-service")),
        grant.clone(),
        outbox.clone(),
        RetryPolicy::default(),
        clock.clone(),
        ServiceSettings {
            app_base: url::Url::parse("https://iam.example.com").unwrap(),
            token_ttl: Duration::days(7),
            default_approver: "approver@example.com".into(),
        },
    ));
    World {
        service,
        store,
        outbox,
        grant,
        clock,
    }
}

/// Pull the token out of the `Approve:` / `Reject:` line of the email.
fn link_token(message: &EmailMessage, label: &str) -> String {
    let line = message
        .text
        .lines()
        .find_map(|l| l.trim().strip_prefix(label))
        .expect("link line");
    let url = url::Url::parse(line.trim()).unwrap();
    assert_eq!(url.path(), "/callback");
    url.query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[tokio::test]
async fn test_approve_link_grants_role_once_and_replay_is_rejected() {
    let w = world();
    let created = w
        .service
        .create_request("u1", "admin", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(created.status, RequestStatus::Pending);

    let email = w.outbox.last_to("approver@example.com");
    let approve = link_token(&email, "Approve:");

    let status = w.service.redeem_callback(&approve).await.unwrap();
    assert_eq!(status, RequestStatus::Approved);
    assert_eq!(
        *w.grant.calls.lock().unwrap(),
        vec![("u1".to_string(), "admin".to_string())]
    );

    let err = w.service.redeem_callback(&approve).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(ValidationError::Replayed)));
    assert_eq!(
        w.service.get_request(created.request_id).await.unwrap().status,
        RequestStatus::Approved
    );
    assert_eq!(w.grant.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_redemptions_of_one_token_have_one_winner() {
    let w = world();
    w.service
        .create_request("u1", "admin", serde_json::json!({}))
        .await
        .unwrap();
    let approve = link_token(&w.outbox.last_to("approver@example.com"), "Approve:");

    let attempts = (0..8).map(|_| {
        let service = w.service.clone();
        let token = approve.clone();
        tokio::spawn(async move { service.redeem_callback(&token).await })
    });
    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(
                err,
                WorkflowError::Validation(ValidationError::Replayed)
                    | WorkflowError::State(StateError::NotPending)
            ),
            "unexpected error {:?}",
            err
        );
    }
    assert_eq!(w.grant.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_approve_and_reject_race_first_commit_wins() {
    let w = world();
    let created = w
        .service
        .create_request("u1", "admin", serde_json::json!({}))
        .await
        .unwrap();
    let email = w.outbox.last_to("approver@example.com");
    let approve = link_token(&email, "Approve:");
    let reject = link_token(&email, "Reject:");

    let (a, r) = tokio::join!(
        w.service.redeem_callback(&approve),
        w.service.redeem_callback(&reject)
    );
    assert!(a.is_ok() ^ r.is_ok(), "exactly one decision commits");

    let final_status = w.service.get_request(created.request_id).await.unwrap().status;
    match (a, r) {
        (Ok(s), Err(e)) | (Err(e), Ok(s)) => {
            assert_eq!(s, final_status);
            assert!(matches!(e, WorkflowError::State(StateError::NotPending)));
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_grant_failure_keeps_request_pending_and_reminder_recovers() {
    let w = world();
    w.grant.failures_left.store(1, Ordering::SeqCst);
    let created = w
        .service
        .create_request("u1", "admin", serde_json::json!({}))
        .await
        .unwrap();
    let approve = link_token(&w.outbox.last_to("approver@example.com"), "Approve:");

    let err = w.service.redeem_callback(&approve).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Collaborator(_)));
    let request = w.service.get_request(created.request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Pending);

    // the consumed link cannot be retried; a reminder issues a fresh pair
    w.clock.advance(Duration::hours(49));
    let scheduler = accessgate::jobs::ReminderScheduler::new(
        w.service.clone(),
        Duration::hours(48),
        Duration::minutes(60),
    );
    assert_eq!(scheduler.tick().await.unwrap().sent, 1);

    let fresh = link_token(&w.outbox.last_to("approver@example.com"), "Approve:");
    assert_ne!(fresh, approve);
    assert_eq!(
        w.service.redeem_callback(&fresh).await.unwrap(),
        RequestStatus::Approved
    );
}

#[tokio::test]
async fn test_requester_and_custom_approver_are_emailed() {
    let w = world();
    let created = w
        .service
        .create_request(
            "u7",
            "auditor",
            serde_json::json!({
                "requester_email": "dev@example.com",
                "approver_email": "lead@example.com"
            }),
        )
        .await
        .unwrap();

    let prompt = w.outbox.last_to("lead@example.com");
    assert_eq!(prompt.subject, "[Action Required] Access request for dev@example.com");

    let reject = link_token(&prompt, "Reject:");
    w.service.redeem_callback(&reject).await.unwrap();

    let confirmation = w.outbox.last_to("dev@example.com");
    assert_eq!(
        confirmation.subject,
        "Your access request for auditor has been rejected"
    );
    assert_eq!(w.outbox.count(), 2);

    let actions: Vec<String> = w
        .service
        .audit_trail(created.request_id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.action)
        .collect();
    assert_eq!(
        actions,
        vec!["request_created", "email_sent", "rejected", "email_sent"]
    );
    assert!(w.grant.calls.lock().unwrap().is_empty(), "reject never grants");
}

#[tokio::test]
async fn test_forged_and_foreign_tokens_are_rejected() {
    let w = world();
    w.service
        .create_request("u1", "admin", serde_json::json!({}))
        .await
        .unwrap();
    let created_id = w.service.list_requests(None, 10).await.unwrap()[0].id;
    let approve = link_token(&w.outbox.last_to("approver@example.com"), "Approve:");

    let err = w.service.redeem_callback("not-a-jwt").await.unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(ValidationError::Malformed)));

    // correctly signed, but minted against a different store
    let other = world();
    other
        .service
        .create_request("u1", "admin", serde_json::json!({}))
        .await
        .unwrap();
    let foreign = link_token(&other.outbox.last_to("approver@example.com"), "Approve:");
    let err = w.service.redeem_callback(&foreign).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(ValidationError::Unknown)));

    // still usable after the failed attempts
    assert_eq!(
        w.service.redeem_callback(&approve).await.unwrap(),
        RequestStatus::Approved
    );
    let used = w
        .store
        .tokens_for_request(created_id)
        .into_iter()
        .filter(|t| t.is_used())
        .count();
    assert_eq!(used, 1);
}
