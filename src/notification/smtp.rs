use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::{authentication::Credentials, response::Response},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;

use super::{ChannelError, EmailMessage, MailChannel, SendReceipt};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: Option<String>,
}

/// Direct SMTP relay channel. Port 465 uses implicit TLS, anything else
/// STARTTLS.
#[derive(Clone)]
pub struct SmtpChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpChannel {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let from = build_mailbox(&config.from_email, config.from_name.as_deref())?;

        let mut builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        }
        .port(config.port)
        .timeout(Some(Duration::from_secs(30)));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

fn build_mailbox(email: &str, name: Option<&str>) -> anyhow::Result<Mailbox> {
    let address = email
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid sender address {}: {}", email, e))?;
    Ok(Mailbox::new(
        name.filter(|n| !n.is_empty()).map(String::from),
        address,
    ))
}

/// Build the multipart/alternative message (plain text first, then HTML).
pub fn build_message(from: &Mailbox, to: &str, message: &EmailMessage) -> Result<Message, ChannelError> {
    let to: Mailbox = to
        .parse()
        .map_err(|e| ChannelError::Config(format!("invalid recipient {}: {}", to, e)))?;

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(message.subject.clone())
        .multipart(MultiPart::alternative_plain_html(
            message.text.clone(),
            message.html.clone(),
        ))
        .map_err(|e| ChannelError::Config(e.to_string()))
}

#[async_trait]
impl MailChannel for SmtpChannel {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(
        &self,
        to: &str,
        message: &EmailMessage,
        correlation_id: Option<&str>,
    ) -> Result<SendReceipt, ChannelError> {
        let email = build_message(&self.from, to, message)?;

        match self.transport.send(email).await {
            Ok(response) => {
                tracing::debug!(to, correlation_id, code = %response.code(), "SMTP accepted message");
                Ok(receipt_from(&response))
            }
            Err(e) if e.is_permanent() => Err(ChannelError::Rejected {
                status: e.status().map(u16::from).unwrap_or(550),
                body: e.to_string(),
            }),
            Err(e) if e.is_transient() => Err(ChannelError::Server {
                status: e.status().map(u16::from).unwrap_or(450),
                body: e.to_string(),
            }),
            Err(e) => Err(ChannelError::Transport(e.to_string())),
        }
    }
}

/// The server's acceptance text (e.g. "2.0.0 Ok: queued as ABC123") doubles
/// as the message id.
fn receipt_from(response: &Response) -> SendReceipt {
    let text = response.message().collect::<Vec<_>>().join(" ");
    SendReceipt {
        external_id: Some(text).filter(|t| !t.is_empty()),
    }
}
