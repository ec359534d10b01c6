//! accessgate: email-driven approval of access requests.
//!
//! A request is created, the approver gets single-use approve/reject links by
//! email, and redeeming one transitions the request and grants the role in
//! the identity provider. The binary in `main.rs` wires these modules; the
//! library is also what the integration tests in `tests/` drive.

use std::sync::Arc;

pub mod api;
pub mod app;
pub mod audit;
pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
pub mod grant;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod store;
pub mod tokens;
pub mod workflow;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub service: Arc<workflow::ApprovalService>,
    /// `None` disables the admin API (every call gets 500).
    pub admin_key: Option<String>,
}
