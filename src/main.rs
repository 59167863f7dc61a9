//! # growbot
//!
//! Server binary: loads settings, opens the store and serves robot links,
//! video relays and user sessions.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use growbot_core::ids::{RobotId, UserId};
use growbot_server::{metrics, GrowbotServer, ServerConfig};
use growbot_settings::GrowbotSettings;
use growbot_store::{Database, FsBlobStore, SqlitePersistence};
use growbot_telemetry::{init_telemetry, LogQuery, SqliteLogSink, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "growbot", about = "Growbot robot link server")]
struct Cli {
    /// Settings file (defaults to $GROWBOT_CONFIG or ./growbot.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server.
    Serve {
        /// Override the bind address, e.g. 127.0.0.1:9000.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print a new session token for an existing user.
    IssueToken {
        #[arg(long)]
        user: i64,
    },
    /// Print persisted warn+ log lines as JSON, most recent first.
    Logs {
        /// WARN or ERROR.
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        robot: Option<RobotId>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

fn load(path: Option<&Path>) -> Result<GrowbotSettings> {
    let settings = match path {
        Some(path) => growbot_settings::load_settings_from_path(path),
        None => growbot_settings::load_settings(),
    };
    settings.context("failed to load settings")
}

fn open_store(settings: &GrowbotSettings) -> Result<Database> {
    let path = Path::new(&settings.storage.database_path);
    Database::open(path).with_context(|| format!("failed to open database {}", path.display()))
}

fn apply_bind(settings: &mut GrowbotSettings, bind: &str) -> Result<()> {
    let Some((host, port)) = bind.rsplit_once(':') else {
        bail!("--bind expects HOST:PORT, got {bind}");
    };
    settings.server.host = host.trim_matches(|c| c == '[' || c == ']').to_string();
    settings.server.port = port
        .parse()
        .with_context(|| format!("invalid port in --bind {bind}"))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load(cli.config.as_deref())?;

    match cli.command {
        Command::IssueToken { user } => issue_token(&settings, UserId::new(user)),
        Command::Logs {
            level,
            robot,
            limit,
        } => print_logs(
            &settings,
            LogQuery {
                level: level.map(|l| l.to_uppercase()),
                robot_id: robot.map(|r| r.to_string()),
                limit: Some(limit),
            },
        ),
        Command::Serve { bind } => {
            if let Some(bind) = bind.as_deref() {
                apply_bind(&mut settings, bind)?;
            }
            serve(settings).await
        }
    }
}

fn issue_token(settings: &GrowbotSettings, user: UserId) -> Result<()> {
    let store = SqlitePersistence::new(open_store(settings)?);
    if !store.users.exists(user)? {
        bail!("no user with id {user}");
    }
    let token = store.users.issue_token(user)?;
    println!("{token}");
    Ok(())
}

fn print_logs(settings: &GrowbotSettings, query: LogQuery) -> Result<()> {
    let path = Path::new(&settings.logging.log_db_path);
    if !path.exists() {
        bail!("no log database at {}", path.display());
    }
    let sink = SqliteLogSink::new(path)
        .with_context(|| format!("failed to open log database {}", path.display()))?;
    for record in sink.query(&query).context("failed to query logs")? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

async fn serve(settings: GrowbotSettings) -> Result<()> {
    let _telemetry = init_telemetry(TelemetryConfig {
        log_level: settings.logging.level.clone(),
        module_levels: vec![
            ("tower_http".into(), "info".into()),
            ("hyper".into(), "warn".into()),
        ],
        json: settings.logging.json,
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: PathBuf::from(&settings.logging.log_db_path),
    });
    info!(version = env!("CARGO_PKG_VERSION"), "starting growbot");

    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;
    let persistence = Arc::new(SqlitePersistence::new(open_store(&settings)?));
    let blobs = Arc::new(FsBlobStore::new(&settings.storage.blob_dir));
    let config = ServerConfig::from_settings(&settings).context("failed to build server config")?;
    let shutdown_timeout = config.shutdown_timeout;

    let server = GrowbotServer::new(
        config,
        persistence.clone(),
        blobs,
        persistence,
        Some(prometheus),
    );
    let (addr, handle) = server.listen().await.context("failed to bind")?;
    info!(%addr, "growbot ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    server
        .shutdown()
        .graceful_shutdown(vec![handle], shutdown_timeout)
        .await;
    Ok(())
}
