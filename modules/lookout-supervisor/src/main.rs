use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lookout_common::file_config::load_settings;
use lookout_common::{Config, Settings};
use lookout_store::PgStore;
use lookout_supervisor::engine::HttpEngine;
use lookout_supervisor::health::HealthReport;
use lookout_supervisor::notify::NotifyRouter;
use lookout_supervisor::supervisor::{ReconcileTrigger, Supervisor};
use lookout_supervisor::worker::{WorkerConfig, WorkerDeps, WorkerLauncher};
use session_engine_client::EngineClient;

const DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Parser)]
#[command(name = "lookout-supervisor")]
#[command(about = "Capture worker supervisor for monitored accounts")]
#[command(version)]
struct Cli {
    /// Policy settings file. A missing file means built-in defaults.
    #[arg(long, global = true, default_value = "config/lookout.toml")]
    settings: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor loop until SIGINT/SIGTERM (default)
    Run,

    /// Print one health line per account and exit
    Health {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let settings = read_settings(&cli.settings)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(settings).await,
        Commands::Health { json } => health(settings, json).await,
    }
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("lookout=info".parse()?);
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn read_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        info!(path = %path.display(), "No settings file, using defaults");
        return Ok(Settings::default());
    }
    let settings = load_settings(path)?;
    info!(path = %path.display(), "Settings loaded");
    Ok(settings)
}

async fn run(settings: Settings) -> Result<()> {
    info!("Lookout supervisor starting...");

    let config = Config::from_env()?;
    config.log_redacted();

    let store = PgStore::connect(&config.database_url, DB_MAX_CONNECTIONS).await?;
    store.migrate().await?;

    let Some(lock) = store.try_lock_supervisor().await? else {
        warn!("Another supervisor holds the lock, exiting");
        return Ok(());
    };

    let engine = HttpEngine::new(EngineClient::new(
        &config.engine_url,
        config.engine_token.as_deref(),
    )?);
    let notify = NotifyRouter::from_config(&config)?;

    let store = Arc::new(store);
    let launcher = WorkerLauncher::new(
        WorkerDeps {
            accounts: store.clone(),
            entities: store.clone(),
            engine: Arc::new(engine),
            notify: Arc::new(notify),
        },
        WorkerConfig::from(&settings.worker),
    );

    let supervisor = Supervisor::new(store.clone(), launcher, &settings);
    watch_reload(supervisor.trigger())?;
    supervisor.run(shutdown_signal()).await;

    lock.release().await;
    info!("Supervisor stopped");
    Ok(())
}

async fn health(settings: Settings, json: bool) -> Result<()> {
    let config = Config::store_from_env()?;
    let store = PgStore::connect(&config.database_url, 2).await?;

    let accounts = store.list_accounts().await?;
    let report = HealthReport::from_heartbeats(
        &accounts,
        chrono::Utc::now(),
        settings.policy.heartbeat_timeout(),
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

/// SIGHUP asks for an immediate reconcile.
fn watch_reload(trigger: ReconcileTrigger) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            trigger.reconcile_now();
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl-C will stop the supervisor");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl-C");
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
        _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
    }
}
