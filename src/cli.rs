use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::models::request::RequestStatus;
use crate::models::token::TokenAction;
use crate::workflow::ApprovalService;

/// accessgate: email-driven access request approvals
#[derive(Parser)]
#[command(name = "accessgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and background jobs
    Serve {
        /// Port to bind (defaults to ACCESSGATE_PORT or 8080)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage access requests
    Request {
        #[command(subcommand)]
        command: RequestCommands,
    },

    /// Run a single reminder pass and exit
    Remind,

    /// Apply database migrations and exit
    Migrate,
}

#[derive(Subcommand)]
pub enum RequestCommands {
    /// Create a request and notify the approver
    Create {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        role: String,
        #[arg(long)]
        requester_email: Option<String>,
        #[arg(long)]
        approver_email: Option<String>,
    },
    /// List requests
    List {
        /// pending, approved, rejected, error or expired
        #[arg(short, long)]
        status: Option<String>,
        #[arg(long, default_value = "50")]
        limit: i64,
    },
    /// Show one request
    Show { request_id: String },
    /// Approve a pending request
    Approve { request_id: String },
    /// Reject a pending request
    Reject { request_id: String },
}

/// Backing logic of `request approve` / `request reject`. Any refusal
/// (unknown id, not pending, grant failure) is an error so the process exits
/// non-zero.
pub async fn decide(
    service: &ApprovalService,
    request_id: &str,
    action: TokenAction,
) -> anyhow::Result<RequestStatus> {
    let id = uuid::Uuid::parse_str(request_id).context("Invalid request_id")?;
    let status = service
        .admin_action(id, action)
        .await
        .with_context(|| format!("Request {} not updated", id))?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::grant::LoggingGrantService;
    use crate::notification::dispatcher::RetryPolicy;
    use crate::notification::{ChannelError, EmailMessage, MailChannel, SendReceipt};
    use crate::store::memory::MemoryStore;
    use crate::tokens::TokenCodec;
    use crate::workflow::ServiceSettings;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NullChannel;

    #[async_trait]
    impl MailChannel for NullChannel {
        fn name(&self) -> &'static str {
            "null"
        }

        async fn send(
            &self,
            _to: &str,
            _message: &EmailMessage,
            _correlation_id: Option<&str>,
        ) -> Result<SendReceipt, ChannelError> {
            Ok(SendReceipt::default())
        }
    }

    fn service() -> ApprovalService {
        ApprovalService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(TokenCodec::new("cli-secret", "iam-email-service")),
            Arc::new(LoggingGrantService),
            Arc::new(NullChannel),
            RetryPolicy::default(),
            Arc::new(SystemClock),
            ServiceSettings {
                app_base: url::Url::parse("http://localhost:8080").unwrap(),
                token_ttl: chrono::Duration::days(7),
                default_approver: "approver@example.com".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_decide_fails_when_not_pending_or_missing() {
        let svc = service();
        let created = svc
            .create_request("u1", "admin", serde_json::json!({}))
            .await
            .unwrap();
        let id = created.request_id.to_string();

        let status = decide(&svc, &id, TokenAction::Reject).await.unwrap();
        assert_eq!(status, RequestStatus::Rejected);

        let err = decide(&svc, &id, TokenAction::Approve).await.unwrap_err();
        assert!(err.to_string().contains("not updated"));
        assert!(format!("{:#}", err).contains("not pending"));

        assert!(decide(&svc, &uuid::Uuid::new_v4().to_string(), TokenAction::Approve)
            .await
            .is_err());
        assert!(decide(&svc, "nope", TokenAction::Approve).await.is_err());
    }

    #[test]
    fn test_parse_request_create() {
        let cli = Cli::parse_from([
            "accessgate",
            "request",
            "create",
            "--subject",
            "u1",
            "--role",
            "admin",
            "--requester-email",
            "dev@example.com",
        ]);
        match cli.command {
            Some(Commands::Request {
                command: RequestCommands::Create { subject, role, requester_email, approver_email },
            }) => {
                assert_eq!(subject, "u1");
                assert_eq!(role, "admin");
                assert_eq!(requester_email.as_deref(), Some("dev@example.com"));
                assert!(approver_email.is_none());
            }
            _ => panic!("expected request create"),
        }
    }

    #[test]
    fn test_serve_port_optional() {
        let cli = Cli::parse_from(["accessgate", "serve"]);
        assert!(matches!(cli.command, Some(Commands::Serve { port: None })));
    }
}
