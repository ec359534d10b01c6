//! Builds the workflow from [`Config`]: store, mail channel, grant service.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, MailerBackend};
use crate::grant::keycloak::KeycloakGrantService;
use crate::grant::{LoggingGrantService, RoleGrantService};
use crate::notification::mailersend::MailerSendChannel;
use crate::notification::smtp::SmtpChannel;
use crate::notification::MailChannel;
use crate::store::memory::MemoryStore;
use crate::store::postgres::PgStore;
use crate::store::ApprovalStore;
use crate::tokens::TokenCodec;
use crate::workflow::{ApprovalService, ServiceSettings};

/// The assembled service plus the database handle, when there is one.
pub struct Runtime {
    pub service: Arc<ApprovalService>,
    pub db: Option<PgStore>,
}

pub fn mail_channel(cfg: &Config) -> anyhow::Result<Arc<dyn MailChannel>> {
    let channel: Arc<dyn MailChannel> = match cfg.mailer_backend {
        MailerBackend::MailerSend => Arc::new(MailerSendChannel::new(cfg.mailersend.clone())?),
        MailerBackend::Smtp => Arc::new(SmtpChannel::new(&cfg.smtp)?),
    };
    Ok(channel)
}

pub fn grant_service(cfg: &Config) -> anyhow::Result<Arc<dyn RoleGrantService>> {
    let grant: Arc<dyn RoleGrantService> = match &cfg.keycloak {
        Some(kc) => Arc::new(KeycloakGrantService::new(kc.clone())?),
        None => Arc::new(LoggingGrantService),
    };
    Ok(grant)
}

fn assemble<S: ApprovalStore + 'static>(
    cfg: &Config,
    store: Arc<S>,
) -> anyhow::Result<Arc<ApprovalService>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let codec = Arc::new(TokenCodec::new(&cfg.token_secret, &cfg.token_issuer));

    Ok(Arc::new(ApprovalService::new(
        store,
        codec,
        grant_service(cfg)?,
        mail_channel(cfg)?,
        cfg.retry.clone(),
        clock,
        ServiceSettings {
            app_base: cfg.app_base.clone(),
            token_ttl: cfg.token_ttl(),
            default_approver: cfg.default_approver_email.clone(),
        },
    )))
}

/// Connect to Postgres when `DATABASE_URL` is set, otherwise fall back to the
/// in-memory store.
pub async fn build(cfg: &Config) -> anyhow::Result<Runtime> {
    match &cfg.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(url).await?;
            let service = assemble(cfg, Arc::new(db.clone()))?;
            Ok(Runtime {
                service,
                db: Some(db),
            })
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (state is lost on restart)");
            let service = assemble(cfg, Arc::new(MemoryStore::new()))?;
            Ok(Runtime { service, db: None })
        }
    }
}
