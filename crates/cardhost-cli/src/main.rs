mod commands;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use cardhost_config::ConfigLoader;
use cardhost_db::SessionStore;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cardhost",
    version,
    about = "cardhost - local game database maintenance"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Database file; overrides the config file
    #[arg(long, env = "CARDHOST_DB", global = true)]
    db: Option<PathBuf>,

    /// Directory holding config.yml or config.toml
    #[arg(long, env = "CARDHOST_CONFIG_DIR", global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Show the schema version and pending migrations
    Status,

    /// Inspect or remove saved game sessions
    Sessions {
        #[command(subcommand)]
        action: SessionCommands,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List saved sessions, most recent first
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a session snapshot as JSON
    Show { session_id: String },
    /// Delete a session and its action log
    Delete { session_id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new()?,
    };
    let config = config_loader.load()?;

    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let db_path = match cli.db {
        Some(path) => path,
        None => {
            config_loader.ensure_dirs()?;
            config_loader.database_path(&config)
        }
    };
    let busy_timeout = Duration::from_millis(config.database.busy_timeout_ms);
    debug!("using database {}", db_path.display());

    let mut out = std::io::stdout().lock();
    match cli.command {
        Commands::Migrate => commands::migrate(&db_path, busy_timeout, &mut out),
        Commands::Status => commands::status(&db_path, busy_timeout, &mut out),
        Commands::Sessions { action } => run_sessions(action, &db_path, busy_timeout, &mut out),
    }
}

fn run_sessions(
    action: SessionCommands,
    db_path: &Path,
    busy_timeout: Duration,
    out: &mut impl Write,
) -> Result<()> {
    let mut store = SessionStore::open(db_path, busy_timeout)?;
    match action {
        SessionCommands::List { json } => commands::list_sessions(&store, json, out),
        SessionCommands::Show { session_id } => commands::show_session(&store, &session_id, out),
        SessionCommands::Delete { session_id } => {
            commands::delete_session(&mut store, &session_id, out)
        }
    }
}
