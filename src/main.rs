//! # Courier: notification scheduling and channel delivery worker
//!
//! Usage:
//!   courier run                      # Start a worker (Ctrl-C drains and exits)
//!   courier send request.json        # Dispatch a notification from a JSON request
//!   courier seen <id>                # Record that the user saw a notification
//!   courier confirm <id>             # Record an explicit confirmation
//!   courier status <id>              # Print the tracking view
//!   courier dead                     # List dead-lettered jobs
//!   courier init-config              # Write the default config file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_core::config::CourierConfig;
use courier_dispatch::{ChannelDispatcher, ChannelRegistry, DispatchRequest, NotificationTracker, SqliteTracker};
use courier_scheduler::{Scheduler, SchedulerStore, SqliteStore};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "courier",
    version,
    about = "📨 Courier: multi-channel notification scheduler"
)]
struct Cli {
    /// Config file (default: ~/.courier/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scheduler worker until Ctrl-C
    Run {
        /// Lease owner name (default: <hostname>-<random>)
        #[arg(long)]
        worker_id: Option<String>,
    },
    /// Dispatch a notification described by a JSON file
    Send { request: PathBuf },
    /// Mark a notification as seen
    Seen { id: String },
    /// Mark a notification as confirmed
    Confirm { id: String },
    /// Show the tracking view of a notification
    Status { id: String },
    /// List dead-lettered jobs as JSON
    Dead {
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Write the default config file and exit
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Engine components sharing one SQLite file.
struct Engine {
    store: Arc<SqliteStore>,
    tracker: Arc<SqliteTracker>,
    dispatcher: Arc<ChannelDispatcher>,
}

impl Engine {
    fn open(config: &CourierConfig, worker_id: Option<&str>) -> Result<Self> {
        let db_path = config.storage.resolved_path();
        let store = Arc::new(
            SqliteStore::open(&db_path, config.scheduler.max_retries)
                .with_context(|| format!("opening scheduler store at {}", db_path.display()))?,
        );
        let tracker = Arc::new(
            SqliteTracker::open(&db_path)
                .with_context(|| format!("opening tracker at {}", db_path.display()))?,
        );

        let mut scheduler = Scheduler::new(store.clone(), config.scheduler.clone());
        if let Some(id) = worker_id {
            scheduler = scheduler.with_worker_id(id);
        }

        let mut registry = ChannelRegistry::new();
        for sender in courier_channels::senders_from_config(&config.channel) {
            registry.register(sender);
        }

        let dispatcher = ChannelDispatcher::new(
            scheduler,
            tracker.clone(),
            Arc::new(registry),
            config.dispatch.clone(),
        );
        Ok(Self {
            store,
            tracker,
            dispatcher: Arc::new(dispatcher),
        })
    }
}

fn load_config(path: Option<&str>) -> Result<(CourierConfig, PathBuf)> {
    match path {
        Some(p) => {
            let path = PathBuf::from(shellexpand::tilde(p).to_string());
            let config = if path.exists() {
                CourierConfig::load_from(&path)?
            } else {
                CourierConfig::default()
            };
            Ok((config, path))
        }
        None => Ok((CourierConfig::load()?, CourierConfig::default_path())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "courier=debug,courier_scheduler=debug,courier_dispatch=debug,courier_channels=debug"
    } else {
        "courier=info,courier_scheduler=info,courier_dispatch=info,courier_channels=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let (config, config_path) = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::InitConfig { force } => {
            if config_path.exists() && !force {
                println!("⚠️  {} already exists (use --force to overwrite)", config_path.display());
                return Ok(());
            }
            CourierConfig::default().save_to(&config_path)?;
            println!("✅ Default config written to {}", config_path.display());
        }
        Command::Run { worker_id } => {
            let engine = Engine::open(&config, worker_id.as_deref())?;
            let scheduler = engine.dispatcher.scheduler().clone();
            tracing::info!(
                "📂 Store: {} ({} pending)",
                config.storage.resolved_path().display(),
                engine.store.pending_count().await?
            );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("🛑 Ctrl-C received, shutting down");
                }
                let _ = shutdown_tx.send(true);
            });

            scheduler.run(engine.dispatcher.clone(), shutdown_rx).await?;
            tracing::info!("👋 Worker stopped");
        }
        Command::Send { request } => {
            let raw = std::fs::read_to_string(&request)
                .with_context(|| format!("reading {}", request.display()))?;
            let request: DispatchRequest = serde_json::from_str(&raw)?;
            let engine = Engine::open(&config, None)?;
            let keys = engine.dispatcher.dispatch(&request).await?;
            println!("{}", serde_json::to_string_pretty(&keys)?);
        }
        Command::Seen { id } => {
            let engine = Engine::open(&config, None)?;
            let first = engine.dispatcher.mark_seen(&id).await?;
            println!("{}", if first { "✅ marked seen" } else { "already seen" });
        }
        Command::Confirm { id } => {
            let engine = Engine::open(&config, None)?;
            let first = engine.dispatcher.mark_confirmed(&id).await?;
            println!("{}", if first { "✅ marked confirmed" } else { "already confirmed" });
        }
        Command::Status { id } => {
            let engine = Engine::open(&config, None)?;
            let Some(notification) = engine.tracker.get(&id).await? else {
                anyhow::bail!("notification {id} not found");
            };
            let view = serde_json::json!({
                "status": notification.overall_status(),
                "notification": notification,
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Dead { limit } => {
            let engine = Engine::open(&config, None)?;
            let items: Vec<serde_json::Value> = engine
                .store
                .dead_items(limit)
                .await?
                .into_iter()
                .map(|item| {
                    let payload = serde_json::from_slice::<serde_json::Value>(&item.payload)
                        .unwrap_or(serde_json::Value::Null);
                    serde_json::json!({
                        "id": item.id,
                        "key": item.key,
                        "retry_count": item.retry_count,
                        "last_error": item.last_error,
                        "due_time": item.due_time,
                        "created_at": item.created_at,
                        "payload": payload,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
    }

    Ok(())
}
