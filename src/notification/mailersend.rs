use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::{ChannelError, EmailMessage, MailChannel, SendReceipt};

pub const DEFAULT_API_URL: &str = "https://api.mailersend.com/v1/email";

#[derive(Debug, Clone)]
pub struct MailerSendConfig {
    pub api_url: String,
    pub api_key: String,
    pub from_email: String,
    pub from_name: String,
}

/// Third-party HTTP mail API channel (MailerSend-compatible payload).
///
/// A single call is exactly one HTTP attempt; retry and backoff belong to
/// [`super::dispatcher::NotificationDispatcher`].
#[derive(Clone)]
pub struct MailerSendChannel {
    client: reqwest::Client,
    config: MailerSendConfig,
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct Payload<'a> {
    from: Address<'a>,
    to: Vec<Address<'a>>,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<&'a str>,
}

impl MailerSendChannel {
    pub fn new(config: MailerSendConfig) -> anyhow::Result<Self> {
        // Per-attempt timeout is enforced by the dispatcher; this is only a backstop.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("accessgate-mailer/1.0")
            .build()?;
        Ok(Self { client, config })
    }
}

/// Parse a `Retry-After` header given in (possibly fractional) seconds.
/// HTTP-date values and hints that do not fit a `Duration` are ignored and
/// fall back to the backoff schedule.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

#[async_trait]
impl MailChannel for MailerSendChannel {
    fn name(&self) -> &'static str {
        "mailersend"
    }

    async fn send(
        &self,
        to: &str,
        message: &EmailMessage,
        correlation_id: Option<&str>,
    ) -> Result<SendReceipt, ChannelError> {
        if self.config.api_key.is_empty() || self.config.from_email.is_empty() {
            return Err(ChannelError::Config(
                "MAILERSEND_API_KEY and MAILERSEND_FROM_EMAIL must be set".into(),
            ));
        }

        let payload = Payload {
            from: Address {
                email: &self.config.from_email,
                name: Some(self.config.from_name.as_str()).filter(|n| !n.is_empty()),
            },
            to: vec![Address { email: to, name: None }],
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
            tags: correlation_id.into_iter().collect(),
        };

        let mut req = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .header("accept", "application/json")
            .json(&payload);
        if let Some(id) = correlation_id {
            req = req.header("x-request-id", id);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let external_id = resp
                .headers()
                .get("x-message-id")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            return Ok(SendReceipt { external_id });
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(ChannelError::RateLimited { retry_after });
        }

        let body = resp.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(ChannelError::Server { status: status.as_u16(), body })
        } else {
            Err(ChannelError::Rejected { status: status.as_u16(), body })
        }
    }
}
