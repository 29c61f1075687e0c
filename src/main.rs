//! fetchd - interactive download session console
//!
//! Drives a [`DownloadManager`] over the in-memory simulated engine. Commands
//! are read from stdin, results and notifications are printed as JSON lines.

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use fetchd_lib::commands::{self, ConsoleCommand};
use fetchd_lib::engine::{InMemoryEngine, NetworkConstraint, SimulationProfile};
use fetchd_lib::{DownloadManager, ManagerConfig};

/// Download session console
#[derive(Parser, Debug)]
#[command(name = "fetchd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to <config dir>/fetchd/config.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum concurrent transfers
    #[arg(long)]
    concurrency: Option<u32>,

    /// Network constraint: wifi, any, unmetered, disabled or 0-3
    #[arg(long)]
    network: Option<NetworkConstraint>,

    /// Attach human-readable sizes to progress notifications
    #[arg(long)]
    auto_convert: bool,

    /// Size of each simulated transfer in bytes
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    simulate_bytes: u64,

    /// Bytes transferred per simulation tick
    #[arg(long, default_value_t = 512 * 1024)]
    chunk_bytes: u64,

    /// Simulation tick in milliseconds
    #[arg(long, default_value_t = 200)]
    tick_ms: u64,
}

fn load_config(args: &Args) -> anyhow::Result<ManagerConfig> {
    let path = args.config.clone().or_else(|| {
        dirs::config_dir()
            .map(|dir| dir.join("fetchd").join("config.toml"))
            .filter(|path| path.exists())
    });

    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ManagerConfig::load(&path)
                .with_context(|| format!("failed to load {}", path.display()))?
        }
        None => ManagerConfig::default(),
    };

    if let Some(concurrency) = args.concurrency {
        config.concurrency_limit = concurrency;
    }
    if let Some(network) = args.network {
        config.network = network;
    }
    if args.auto_convert {
        config.auto_convert_units = true;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let engine = Arc::new(InMemoryEngine::with_simulation(SimulationProfile {
        total_bytes: args.simulate_bytes,
        chunk_bytes: args.chunk_bytes.max(1),
        tick: Duration::from_millis(args.tick_ms.max(1)),
    }));
    let manager = DownloadManager::with_config(InMemoryEngine::factory(&engine), &config);

    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Could not serialize {}: {}", event.event_name(), e),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} notification(s)", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    manager.initialize_from_config(&config).await;
    if !manager.is_initialized() {
        anyhow::bail!("downloader failed to initialize");
    }
    println!("{}", serde_json::json!({ "ready": true, "help": "type 'help' for commands" }));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(message) => {
                println!("{}", serde_json::json!({ "error": message }));
                continue;
            }
        };
        if command == ConsoleCommand::Quit {
            break;
        }
        match commands::execute(&manager, command) {
            Ok(value) => println!("{}", value),
            Err(message) => println!("{}", serde_json::json!({ "error": message })),
        }
    }

    manager.shutdown();
    drop(manager);
    // Give the printer a moment to flush what was already queued
    let _ = tokio::time::timeout(Duration::from_millis(100), printer).await;
    Ok(())
}
