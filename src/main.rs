use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{info, warn};

use supply_relay::persistence::{InMemoryStore, Persistence};
use supply_relay::{
    init_config, init_telemetry, InboundDriver, JsonLinesTransport, Relay, RelayConfig,
    ShutdownCoordinator,
};

#[derive(Parser)]
#[command(name = "supply-relay")]
#[command(about = "Chat relay for supply requests with busy-gated notifications")]
#[command(long_about = "Reads chat interactions as JSON lines on stdin, runs registration, request, \
                       response and admin workflows, and writes outbound messages as JSON lines on stdout. \
                       Notifications for a subject inside a workflow are held until it finishes.")]
struct Cli {
    /// Configuration file (defaults to supply-relay.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve interactions from stdin until EOF or Ctrl-C (default)
    Run,
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = RelayConfig::load_env_file();

    let config = match &cli.config {
        Some(path) => RelayConfig::load_from(path)?,
        None => init_config()?.clone(),
    };

    match cli.command {
        None | Some(Commands::Run) => {
            let runtime = tokio::runtime::Runtime::new()?;
            let result = runtime.block_on(run_command(config));
            // A stdin read still pending after Ctrl-C would keep the runtime alive.
            runtime.shutdown_timeout(Duration::from_secs(1));
            result
        }
        Some(Commands::Config) => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn run_command(config: RelayConfig) -> Result<()> {
    init_telemetry(&config.observability)?;
    if config.bot.token.is_none() {
        warn!("No bot token configured; outbound messages are only written to stdout");
    }

    let store = open_store(&config).await?;
    let transport = Arc::new(JsonLinesTransport::stdout());
    let relay = Relay::build(&config, store, transport);

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let watcher = relay.watcher.clone().spawn(shutdown.subscribe());
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown.wait_for_signal().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
        })
    };

    let driver = InboundDriver::new(relay.router.clone());
    let report = driver
        .run(BufReader::new(tokio::io::stdin()), shutdown.subscribe())
        .await?;
    info!(
        accepted = report.accepted,
        malformed = report.malformed,
        overflowed = report.overflowed,
        workers = report.workers_started,
        "Inbound stream finished"
    );

    shutdown.trigger();
    signals.abort();
    shutdown.drain(vec![watcher], Duration::from_secs(10)).await;
    Ok(())
}

#[cfg(feature = "database")]
async fn open_store(config: &RelayConfig) -> Result<Arc<dyn Persistence>> {
    match &config.database {
        Some(database) => {
            let store =
                supply_relay::persistence::SqliteStore::connect(&database.url, database.max_connections)
                    .await?;
            info!(url = %database.url, "Using SQLite storage");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "database"))]
async fn open_store(config: &RelayConfig) -> Result<Arc<dyn Persistence>> {
    if config.database.is_some() {
        warn!("Database configured but the `database` feature is disabled; using in-memory storage");
    }
    Ok(Arc::new(InMemoryStore::new()))
}
