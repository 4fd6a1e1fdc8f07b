// Pump RFID Verification - Admin CLI
//
// Local commands (init, import, add-user) work on the database file directly.
// Everything else talks to a running pump-server through the API client.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pump_verification::client::{AuditParams, HistoryParams};
use pump_verification::{
    db, import, ApiClient, Config, EntityType, NewUser, PumpStatus, Role, Service, SessionContext,
    StationStatus, Verdict, VerificationRequest,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pump-verification", version, about = "Pump RFID verification admin tool")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "PUMPV_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file for local commands
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Base URL of the API
    #[arg(
        long,
        global = true,
        env = "PUMPV_URL",
        default_value = "http://127.0.0.1:4000/api/v1"
    )]
    url: String,

    /// API token of the acting user
    #[arg(long, global = true, env = "PUMPV_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database schema
    Init,
    /// Bulk-create stations, pumps and expected tags from a CSV file
    Import { csv: PathBuf },
    /// Create a user and print its API token
    AddUser {
        username: String,
        #[arg(long)]
        full_name: String,
        /// OPERATOR, ADMIN or SUPER_ADMIN
        #[arg(long, default_value = "OPERATOR")]
        role: String,
        /// Password for `login`; without one only the API token works
        #[arg(long, env = "PUMPV_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Check that the server is up
    Health,
    /// Log in and print a session token
    Login {
        username: String,
        #[arg(long, env = "PUMPV_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Revoke the token given with --token
    Logout,
    /// Show the user behind the token
    Whoami,
    /// List stations
    Stations {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// List pumps, optionally of one station
    Pumps {
        #[arg(long)]
        station: Option<i64>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Submit a scan for a pump
    Verify {
        pump_id: i64,
        /// Main tag read from the pump
        #[arg(long = "main")]
        main_tag: String,
        /// Child tag read from the pump; repeat for each tag
        #[arg(long = "child")]
        child_tags: Vec<String>,
    },
    /// Verification history of one pump, or of all pumps
    History {
        pump_id: Option<i64>,
        #[arg(long)]
        result: Option<String>,
        #[arg(long)]
        station: Option<i64>,
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Audit trail
    Audit {
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long)]
        entity_id: Option<i64>,
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Dashboard counters
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.apply_env().context("Invalid environment override")?;
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Init => run_init(&config.database.path),
        Command::Import { csv } => run_import(&config, &csv),
        Command::AddUser {
            username,
            full_name,
            role,
            password,
        } => run_add_user(&config, username, full_name, &role, password),
        remote => run_remote(client(&cli.url, cli.token)?, remote).await,
    }
}

fn open_service(config: &Config) -> Result<Service> {
    let conn = db::open(&config.database.path).with_context(|| {
        format!("Failed to open database {}", config.database.path.display())
    })?;
    Ok(Service::new(conn)
        .with_conflict_retries(config.verification.conflict_retries)
        .with_session_ttl(config.auth.session_ttl()))
}

fn run_init(path: &Path) -> Result<()> {
    db::open(path).with_context(|| format!("Failed to initialize {}", path.display()))?;
    info!("database ready at {}", path.display());
    println!("✓ Database initialized at {}", path.display());
    Ok(())
}

fn run_import(config: &Config, csv: &Path) -> Result<()> {
    let rows = import::load_csv(csv).with_context(|| format!("Failed to read {}", csv.display()))?;
    println!("📂 Loaded {} rows from {}", rows.len(), csv.display());

    let service = open_service(config)?;
    let summary = import::import(&service, &SessionContext::system(), &rows)?;

    println!("✓ Stations created: {}", summary.stations_created);
    println!("✓ Pumps created:    {}", summary.pumps_created);
    println!("  Pumps skipped:    {}", summary.pumps_skipped);
    Ok(())
}

fn run_add_user(
    config: &Config,
    username: String,
    full_name: String,
    role: &str,
    password: Option<String>,
) -> Result<()> {
    let role: Role = role.parse()?;
    let service = open_service(config)?;
    let issued = service.create_user(
        &SessionContext::system(),
        &NewUser {
            username,
            full_name,
            role,
            password,
        },
    )?;

    println!(
        "✓ Created user '{}' ({}) with id {}",
        issued.user.username,
        issued.user.role.as_str(),
        issued.user.id
    );
    println!("Token (shown once): {}", issued.token);
    Ok(())
}

fn client(url: &str, token: Option<String>) -> Result<ApiClient> {
    let client = ApiClient::new(url)?;
    Ok(match token {
        Some(token) => client.with_token(token),
        None => client,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_remote(client: ApiClient, command: Command) -> Result<()> {
    match command {
        Command::Health => {
            if !client.health().await? {
                bail!("server at {} is not healthy", client.base_url());
            }
            println!("✓ {} is healthy", client.base_url());
        }
        Command::Whoami => print_json(&client.me().await?)?,
        Command::Login { username, password } => {
            let session = client.login(&username, &password).await?;
            println!(
                "✓ Logged in as '{}' ({}), token valid for {}s",
                session.user.username,
                session.user.role.as_str(),
                session.expires_in
            );
            println!("export PUMPV_TOKEN={}", session.access_token);
        }
        Command::Logout => {
            client.logout().await?;
            println!("✓ Token revoked");
        }
        Command::Stations {
            status,
            page,
            limit,
        } => {
            let status = status.as_deref().map(str::parse::<StationStatus>).transpose()?;
            let listing = client.list_stations(status, page, limit).await?;
            print_json(&listing.items)?;
            if let Some(meta) = listing.pagination {
                println!(
                    "page {}/{} ({} stations)",
                    meta.page, meta.total_pages, meta.total
                );
            }
        }
        Command::Pumps { station, status } => {
            let status = status.as_deref().map(str::parse::<PumpStatus>).transpose()?;
            let pumps = match station {
                Some(station_id) => {
                    let pumps = client.list_station_pumps(station_id).await?;
                    match status {
                        Some(status) => pumps.into_iter().filter(|p| p.status == status).collect(),
                        None => pumps,
                    }
                }
                None => client.list_pumps(status).await?,
            };
            print_json(&pumps)?;
        }
        Command::Verify {
            pump_id,
            main_tag,
            child_tags,
        } => {
            let session = client
                .verify(
                    pump_id,
                    &VerificationRequest {
                        main_tag_scanned: main_tag,
                        scanned_child_tags: child_tags,
                    },
                )
                .await?;
            print_json(&session)?;
        }
        Command::History {
            pump_id,
            result,
            station,
            page,
            limit,
        } => {
            let result = match result.as_deref() {
                Some(raw) => match Verdict::parse(raw) {
                    Some(verdict) => Some(verdict),
                    None => bail!("unknown result '{}', expected success or failed", raw),
                },
                None => None,
            };
            let params = HistoryParams {
                result,
                station_id: station,
                page,
                limit,
                ..Default::default()
            };
            let listing = match pump_id {
                Some(pump_id) => client.pump_history(pump_id, &params).await?,
                None => client.all_verifications(&params).await?,
            };
            print_json(&listing.items)?;
        }
        Command::Audit {
            entity_type,
            entity_id,
            page,
            limit,
        } => {
            let params = AuditParams {
                entity_type: entity_type
                    .as_deref()
                    .map(str::parse::<EntityType>)
                    .transpose()?,
                entity_id,
                page,
                limit,
                ..Default::default()
            };
            print_json(&client.audit_logs(&params).await?.items)?;
        }
        Command::Stats => print_json(&client.analytics().await?)?,
        Command::Init | Command::Import { .. } | Command::AddUser { .. } => {
            bail!("local command routed to the API client")
        }
    }
    Ok(())
}
