// Pump RFID Verification - API Server
// REST API with Axum over the shared SQLite database

use anyhow::{Context, Result};
use clap::Parser;
use pump_verification::{build_router, config::ENV_BIND, db, AppState, Config, Service};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pump-server", version, about = "Pump RFID verification API server")]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "PUMPV_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind, e.g. 0.0.0.0:4000
    #[arg(long)]
    bind: Option<String>,

    /// SQLite database file
    #[arg(long)]
    database: Option<PathBuf>,
}

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply_env().context("Invalid environment override")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }

    init_tracing(&config.log.filter);
    info!(
        "Starting pump verification server v{}",
        pump_verification::VERSION
    );

    let conn = db::open(&config.database.path)
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;
    info!("Database opened: {}", config.database.path.display());

    let service = Service::new(conn)
        .with_conflict_retries(config.verification.conflict_retries)
        .with_session_ttl(config.auth.session_ttl());
    if service.count_users()? == 0 {
        warn!("No users exist yet; create one with `pump-verification add-user`");
    }

    let app = build_router(AppState::new(service, config.pagination));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| {
            format!(
                "Failed to bind to {} (set --bind or {})",
                config.server.bind, ENV_BIND
            )
        })?;

    info!("Listening on http://{}", config.server.bind);
    info!("Health check: http://{}/health", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
