use serde::Deserialize;

use crate::grant::keycloak::KeycloakConfig;
use crate::notification::dispatcher::RetryPolicy;
use crate::notification::mailersend::{MailerSendConfig, DEFAULT_API_URL};
use crate::notification::smtp::SmtpConfig;

const PLACEHOLDER_SECRET: &str = "CHANGE_ME_TOKEN_SECRET";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailerBackend {
    MailerSend,
    Smtp,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// When unset the in-memory store is used and nothing survives a restart.
    pub database_url: Option<String>,
    pub app_base: url::Url,
    pub token_secret: String,
    pub token_issuer: String,
    pub token_expiry_seconds: i64,
    pub reminder_hours: i64,
    pub reminder_check_interval_minutes: i64,
    /// Pending requests older than this are expired. 0 = never.
    pub request_ttl_hours: i64,
    pub default_approver_email: String,
    pub admin_key: Option<String>,
    pub mailer_backend: MailerBackend,
    pub mailersend: MailerSendConfig,
    pub smtp: SmtpConfig,
    pub retry: RetryPolicy,
    pub keycloak: Option<KeycloakConfig>,
}

impl Config {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_expiry_seconds)
    }

    pub fn reminder_staleness(&self) -> chrono::Duration {
        chrono::Duration::hours(self.reminder_hours)
    }

    pub fn reminder_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reminder_check_interval_minutes)
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let token_secret = var("TOKEN_SECRET").unwrap_or_else(|| PLACEHOLDER_SECRET.into());
    if token_secret == PLACEHOLDER_SECRET {
        let env_mode = var("ACCESSGATE_ENV")
            .or_else(|| var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "TOKEN_SECRET is still the insecure placeholder. \
                 Set a long random secret before running in production."
            );
        }
        tracing::warn!("TOKEN_SECRET is not set; using insecure placeholder");
    }

    let app_base_raw = var("APP_BASE").unwrap_or_else(|| "http://localhost:8080".into());
    let app_base = url::Url::parse(&app_base_raw)
        .map_err(|e| anyhow::anyhow!("APP_BASE {:?} is not a valid URL: {}", app_base_raw, e))?;
    if app_base.cannot_be_a_base() {
        anyhow::bail!("APP_BASE {:?} must be an http(s) URL", app_base_raw);
    }

    let mailer_backend = match var("MAILER_BACKEND").as_deref().map(str::to_lowercase).as_deref() {
        None | Some("mailersend") => MailerBackend::MailerSend,
        Some("smtp") => MailerBackend::Smtp,
        Some(other) => anyhow::bail!("unknown MAILER_BACKEND {:?} (expected mailersend or smtp)", other),
    };

    let keycloak = match (
        var("KEYCLOAK_SERVER_URL"),
        var("KEYCLOAK_REALM"),
        var("KEYCLOAK_CLIENT_ID"),
        var("KEYCLOAK_CLIENT_SECRET"),
    ) {
        (Some(server_url), Some(realm), Some(client_id), Some(client_secret)) => Some(KeycloakConfig {
            server_url,
            realm,
            client_id,
            client_secret,
        }),
        (None, None, None, None) => None,
        _ => anyhow::bail!(
            "KEYCLOAK_SERVER_URL, KEYCLOAK_REALM, KEYCLOAK_CLIENT_ID and \
             KEYCLOAK_CLIENT_SECRET must be set together"
        ),
    };

    let retry = RetryPolicy {
        max_attempts: parsed("MAILERSEND_MAX_RETRIES", 3u32).max(1),
        backoff_base: parsed("MAILERSEND_RETRY_BACKOFF", 2.0f64),
        max_wait: std::time::Duration::from_secs(parsed("MAIL_MAX_BACKOFF_SECS", 60u64)),
        jitter: std::time::Duration::from_millis(parsed("MAIL_BACKOFF_JITTER_MS", 0u64)),
        attempt_timeout: std::time::Duration::from_secs(parsed("MAIL_ATTEMPT_TIMEOUT_SECS", 10u64)),
    };

    Ok(Config {
        port: parsed("ACCESSGATE_PORT", 8080),
        database_url: var("DATABASE_URL"),
        app_base,
        token_secret,
        token_issuer: var("TOKEN_ISSUER").unwrap_or_else(|| "iam-email-service".into()),
        token_expiry_seconds: parsed("TOKEN_EXPIRY_SECONDS", 7 * 24 * 3600),
        reminder_hours: parsed("REMINDER_HOURS", 48),
        reminder_check_interval_minutes: parsed("REMINDER_CHECK_INTERVAL_MINUTES", 60).max(1),
        request_ttl_hours: parsed("REQUEST_TTL_HOURS", 0),
        default_approver_email: var("DEFAULT_APPROVER_EMAIL")
            .unwrap_or_else(|| "approver@example.com".into()),
        admin_key: var("ACCESSGATE_ADMIN_KEY"),
        mailer_backend,
        mailersend: MailerSendConfig {
            api_url: var("MAILERSEND_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            api_key: var("MAILERSEND_API_KEY").unwrap_or_default(),
            from_email: var("MAILERSEND_FROM_EMAIL").unwrap_or_default(),
            from_name: var("MAILERSEND_FROM_NAME").unwrap_or_default(),
        },
        smtp: SmtpConfig {
            host: var("SMTP_HOST").unwrap_or_else(|| "localhost".into()),
            port: parsed("SMTP_PORT", 465),
            username: var("SMTP_USER"),
            password: var("SMTP_PASS"),
            from_email: var("SMTP_FROM_EMAIL").unwrap_or_else(|| "noreply@example.com".into()),
            from_name: var("SMTP_FROM_NAME"),
        },
        retry,
        keycloak,
    })
}
