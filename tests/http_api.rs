//! HTTP surface tests: admin auth, request management and the callback page.

use std::sync::{Arc, Mutex};

use accessgate::clock::SystemClock;
use accessgate::grant::LoggingGrantService;
use accessgate::notification::dispatcher::RetryPolicy;
use accessgate::notification::{ChannelError, EmailMessage, MailChannel, SendReceipt};
use accessgate::store::memory::MemoryStore;
use accessgate::tokens::TokenCodec;
use accessgate::workflow::{ApprovalService, ServiceSettings};
use accessgate::{api, AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

const ADMIN_KEY: &str = "test-admin-key-0123456789";

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl MailChannel for Outbox {
    fn name(&self) -> &'static str {
        "outbox"
    }

    async fn send(
        &self,
        _to: &str,
        message: &EmailMessage,
        _correlation_id: Option<&str>,
    ) -> Result<SendReceipt, ChannelError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(SendReceipt::default())
    }
}

fn app() -> (Router, Arc<Outbox>) {
    let outbox = Arc::new(Outbox::default());
    let service = Arc::new(ApprovalService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(TokenCodec::new("http-secret", "iam-email-service")),
        Arc::new(LoggingGrantService),
        outbox.clone(),
        RetryPolicy::default(),
        Arc::new(SystemClock),
        ServiceSettings {
            app_base: url::Url::parse("http://localhost:8080").unwrap(),
            token_ttl: chrono::Duration::days(7),
            default_approver: "approver@example.com".into(),
        },
    ));
    let state = Arc::new(AppState {
        service,
        admin_key: Some(ADMIN_KEY.into()),
    });
    (api::router(state), outbox)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn admin(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-key", ADMIN_KEY)
        .header("content-type", "application/json");
    match body {
        Some(v) => builder.body(Body::from(v.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn approve_path(message: &EmailMessage) -> String {
    let line = message
        .text
        .lines()
        .find_map(|l| l.trim().strip_prefix("Approve:"))
        .unwrap();
    let url = url::Url::parse(line.trim()).unwrap();
    format!("{}?{}", url.path(), url.query().unwrap())
}

#[tokio::test]
async fn test_healthz_and_metrics_are_public() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, _) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_api_requires_key() {
    let (app, _) = app();
    let (status, _) = send(&app, get("/api/v1/requests")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .uri("/api/v1/requests")
        .header("authorization", "Bearer not-the-key")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let bearer = Request::builder()
        .uri("/api/v1/requests")
        .header("authorization", format!("Bearer {}", ADMIN_KEY))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, bearer).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_create_then_click_approve_link() {
    let (app, outbox) = app();
    let (status, body) = send(
        &app,
        admin(
            "POST",
            "/api/v1/requests",
            Some(json!({"subject_id": "u1", "requested_role": "admin"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let created: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(created["status"], "pending");
    let id = created["request_id"].as_str().unwrap().to_string();

    let link = approve_path(&outbox.sent.lock().unwrap()[0]);
    let (status, page) = send(&app, get(&link)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("approved"));

    let (status, _) = send(&app, get(&link)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "replayed link");

    let (status, body) = send(&app, admin("GET", &format!("/api/v1/requests/{}", id), None)).await;
    assert_eq!(status, StatusCode::OK);
    let request: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(request["status"], "approved");
    assert_eq!(request["subject_id"], "u1");
}

#[tokio::test]
async fn test_decision_endpoint_conflicts_once_decided() {
    let (app, _) = app();
    let (_, body) = send(
        &app,
        admin(
            "POST",
            "/api/v1/requests",
            Some(json!({"subject_id": "u2", "requested_role": "viewer"})),
        ),
    )
    .await;
    let id = serde_json::from_str::<Value>(&body).unwrap()["request_id"]
        .as_str()
        .unwrap()
        .to_string();
    let uri = format!("/api/v1/requests/{}/decision", id);

    let (status, body) = send(&app, admin("POST", &uri, Some(json!({"decision": "reject"})))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["status"], "rejected");

    let (status, body) = send(&app, admin("POST", &uri, Some(json!({"decision": "approve"})))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap()["error"]["code"],
        "not_pending"
    );

    let (status, _) = send(&app, admin("POST", &uri, Some(json!({"decision": "maybe"})))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bad_inputs() {
    let (app, _) = app();

    let (status, _) = send(&app, get("/callback")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/callback?token=garbage")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        admin("GET", &format!("/api/v1/requests/{}", uuid::Uuid::new_v4()), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, admin("GET", "/api/v1/requests/not-a-uuid", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, admin("GET", "/api/v1/requests?status=bogus", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        admin(
            "POST",
            "/api/v1/requests",
            Some(json!({"subject_id": " ", "requested_role": "admin"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
