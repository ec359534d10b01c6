pub mod dispatcher;
pub mod mailersend;
pub mod smtp;
pub mod templates;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// A rendered email ready to hand to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// What a channel reports for a delivered message.
#[derive(Debug, Clone, Default)]
pub struct SendReceipt {
    /// Provider-side message id, when the provider returns one.
    pub external_id: Option<String>,
}

/// Outcome of a single send attempt, classified for the retry policy.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("rejected {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel misconfigured: {0}")]
    Config(String),
}

impl ChannelError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::RateLimited { .. } | ChannelError::Server { .. } | ChannelError::Transport(_)
        )
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelError::RateLimited { .. } => "rate_limited",
            ChannelError::Server { .. } => "server_error",
            ChannelError::Rejected { .. } => "rejected",
            ChannelError::Transport(_) => "transport",
            ChannelError::Config(_) => "config",
        }
    }
}

/// Outbound mail backend. Chosen once at construction; callers never branch
/// on which implementation is active.
#[async_trait]
pub trait MailChannel: Send + Sync {
    /// Stable name used in logs, metrics and audit actor fields.
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        to: &str,
        message: &EmailMessage,
        correlation_id: Option<&str>,
    ) -> Result<SendReceipt, ChannelError>;
}
