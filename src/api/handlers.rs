use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{AppError, ValidationError, WorkflowError};
use crate::models::audit::AuditRecord;
use crate::models::request::{AccessRequest, RequestStatus};
use crate::models::token::TokenAction;
use crate::workflow::CreatedRequest;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct CreateRequestBody {
    pub subject_id: String,
    pub requested_role: String,
    pub requester_email: Option<String>,
    pub approver_email: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub decision: String, // "approve" | "reject"
}

#[derive(Serialize)]
pub struct DecisionResponse {
    pub id: Uuid,
    pub ok: bool,
    pub status: RequestStatus,
}

#[derive(Deserialize)]
pub struct CallbackParams {
    pub token: Option<String>,
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("invalid request id: {}", raw)))
}

/// Fold the top-level email fields into the metadata object.
fn build_metadata(body: &CreateRequestBody) -> Result<Value, AppError> {
    let mut metadata = match body.metadata.clone() {
        None | Some(Value::Null) => serde_json::Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(AppError::BadRequest("metadata must be a JSON object".into())),
    };
    if let Some(email) = &body.requester_email {
        metadata.insert("requester_email".into(), Value::String(email.clone()));
    }
    if let Some(email) = &body.approver_email {
        metadata.insert("approver_email".into(), Value::String(email.clone()));
    }
    Ok(Value::Object(metadata))
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /api/v1/requests: create a request and notify the approver
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<CreatedRequest>), AppError> {
    let subject_id = body.subject_id.trim();
    let role = body.requested_role.trim();
    if subject_id.is_empty() || role.is_empty() {
        return Err(AppError::BadRequest(
            "subject_id and requested_role are required".into(),
        ));
    }
    let metadata = build_metadata(&body)?;

    let created = state
        .service
        .create_request(subject_id, role, metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/requests/:id
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<Json<AccessRequest>, AppError> {
    let id = parse_id(&id_str)?;
    Ok(Json(state.service.get_request(id).await?))
}

/// GET /api/v1/requests/:id/audit: oldest first
pub async fn get_audit_trail(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<Json<Vec<AuditRecord>>, AppError> {
    let id = parse_id(&id_str)?;
    state.service.get_request(id).await?;
    Ok(Json(state.service.audit_trail(id).await?))
}

/// GET /api/v1/requests?status=pending: newest first
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<AccessRequest>>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<RequestStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;
    let limit = params.limit.unwrap_or(50).clamp(1, 200);

    Ok(Json(state.service.list_requests(status, limit).await?))
}

/// POST /api/v1/requests/:id/decision: admin approve/reject without a token
pub async fn decide_request(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<DecisionResponse>, AppError> {
    let id = parse_id(&id_str)?;
    let action: TokenAction = payload.decision.parse().map_err(AppError::BadRequest)?;

    tracing::info!(request_id = %id, decision = %action, "admin decision");
    let status = state.service.admin_action(id, action).await?;

    Ok(Json(DecisionResponse { id, ok: true, status }))
}

/// GET /callback?token=…: the link the approver clicks
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let outcome = match params.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => state.service.redeem_callback(token).await,
        _ => Err(WorkflowError::Validation(ValidationError::Malformed)),
    };

    match outcome {
        Ok(status) => (
            StatusCode::OK,
            page("Done", &format!("The access request has been {}.", status)),
        )
            .into_response(),
        Err(e) => {
            let message = match &e {
                WorkflowError::Validation(ValidationError::Malformed) => "This link is invalid.",
                WorkflowError::Validation(ValidationError::Expired) => "This link has expired.",
                WorkflowError::Validation(ValidationError::Unknown) => "This link is not recognised.",
                WorkflowError::Validation(ValidationError::Replayed) => {
                    "This link has already been used."
                }
                WorkflowError::State(crate::errors::StateError::NotFound) => {
                    "The access request no longer exists."
                }
                WorkflowError::State(crate::errors::StateError::NotPending) => {
                    "This access request has already been decided."
                }
                WorkflowError::Collaborator(_) => {
                    "The role could not be assigned. Please try again later."
                }
                WorkflowError::Storage(_) => "Something went wrong. Please try again later.",
            };
            tracing::warn!(code = e.code(), "callback rejected: {}", e);
            let status = AppError::from(e).status_code();
            (status, page("Request not processed", message)).into_response()
        }
    }
}

/// GET /metrics: Prometheus text format
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(),
    )
}

fn page(title: &str, message: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{message}</p></body></html>",
        title = title,
        message = message,
    ))
}
