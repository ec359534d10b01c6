use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use accessgate::app::{self, Runtime};
use accessgate::cli::{self, RequestCommands};
use accessgate::config::{self, Config};
use accessgate::jobs::{ExpirySweeper, ReminderScheduler};
use accessgate::models::request::RequestStatus;
use accessgate::models::token::TokenAction;
use accessgate::store::postgres::PgStore;
use accessgate::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when an endpoint is configured
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "accessgate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "accessgate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Request { command }) => {
            let runtime = app::build(&cfg).await?;
            handle_request_command(&runtime, command).await
        }
        Some(cli::Commands::Remind) => {
            let runtime = app::build(&cfg).await?;
            let report = ReminderScheduler::new(
                runtime.service.clone(),
                cfg.reminder_staleness(),
                cfg.reminder_interval(),
            )
            .tick()
            .await?;
            println!(
                "Scanned {} stale request(s): {} reminded, {} skipped, {} failed.",
                report.scanned, report.sent, report.skipped, report.failed
            );
            Ok(())
        }
        Some(cli::Commands::Migrate) => {
            let url = cfg
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to run migrations")?;
            let db = PgStore::connect(url).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let Runtime { service, db } = app::build(&cfg).await?;

    if let Some(db) = &db {
        tracing::info!("Running migrations...");
        db.migrate().await?;
    }

    let state = Arc::new(AppState {
        service: service.clone(),
        admin_key: cfg.admin_key.clone(),
    });
    if state.admin_key.is_none() {
        tracing::warn!("ACCESSGATE_ADMIN_KEY is not set; the admin API will refuse every call");
    }

    let app = api::router(state)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let every = cfg
        .reminder_interval()
        .to_std()
        .context("REMINDER_CHECK_INTERVAL_MINUTES must be positive")?;
    ReminderScheduler::new(service.clone(), cfg.reminder_staleness(), cfg.reminder_interval())
        .spawn(every);
    tracing::info!(
        every_minutes = cfg.reminder_check_interval_minutes,
        staleness_hours = cfg.reminder_hours,
        "Reminder job started"
    );

    if cfg.request_ttl_hours > 0 {
        ExpirySweeper::new(service.clone(), chrono::Duration::hours(cfg.request_ttl_hours))
            .spawn(every);
        tracing::info!(ttl_hours = cfg.request_ttl_hours, "Expiry job started");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(mailer = service.mail_channel(), "accessgate listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers. Callback URLs carry tokens, so referrers
/// are stripped and nothing is cached.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}

async fn handle_request_command(runtime: &Runtime, cmd: RequestCommands) -> anyhow::Result<()> {
    let service = &runtime.service;
    match cmd {
        RequestCommands::Create {
            subject,
            role,
            requester_email,
            approver_email,
        } => {
            let mut metadata = serde_json::Map::new();
            if let Some(email) = requester_email {
                metadata.insert("requester_email".into(), email.into());
            }
            if let Some(email) = approver_email {
                metadata.insert("approver_email".into(), email.into());
            }
            let created = service
                .create_request(&subject, &role, serde_json::Value::Object(metadata))
                .await?;
            println!("Request created: {} ({})", created.request_id, created.status);
        }
        RequestCommands::List { status, limit } => {
            let status = status
                .as_deref()
                .map(str::parse::<RequestStatus>)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let requests = service.list_requests(status, limit).await?;

            if requests.is_empty() {
                println!("No requests.");
                return Ok(());
            }

            println!("{:<38} {:<10} {:<20} {:<20} CREATED", "ID", "STATUS", "SUBJECT", "ROLE");
            for r in requests {
                println!(
                    "{:<38} {:<10} {:<20} {:<20} {}",
                    r.id, r.status, r.subject_id, r.requested_role, r.created_at
                );
            }
        }
        RequestCommands::Show { request_id } => {
            let id = uuid::Uuid::parse_str(&request_id).context("Invalid request_id")?;
            let request = service.get_request(id).await?;
            println!("{}", serde_json::to_string_pretty(&request)?);

            let trail = service.audit_trail(id).await?;
            if !trail.is_empty() {
                println!("\nAudit trail:");
                for entry in trail {
                    println!("  {}  {:<16} {}", entry.created_at, entry.action, entry.actor);
                }
            }
        }
        RequestCommands::Approve { request_id } => {
            decide(runtime, &request_id, TokenAction::Approve).await?;
        }
        RequestCommands::Reject { request_id } => {
            decide(runtime, &request_id, TokenAction::Reject).await?;
        }
    }
    Ok(())
}

async fn decide(runtime: &Runtime, request_id: &str, action: TokenAction) -> anyhow::Result<()> {
    let status = cli::decide(&runtime.service, request_id, action).await?;
    println!("Request {} {}.", request_id, status);
    Ok(())
}
