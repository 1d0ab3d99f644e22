//! # Flowdeck: Workflow Persistence & Scheduling Server
//!
//! Usage:
//!   flowdeck                         # Start the gateway (default port 3000)
//!   flowdeck serve --port 8080       # Custom port
//!   flowdeck list                    # Saved workflows, newest first
//!   flowdeck show <id>               # Full workflow definition as JSON
//!   flowdeck scan                    # Run one scheduler tick now and exit
//!   flowdeck init-config             # Write ~/.flowdeck/config.toml

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowdeck_core::config::FlowdeckConfig;
use flowdeck_gateway::AppState;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "flowdeck",
    version,
    about = "⏰ Flowdeck: save workflow graphs and run them on a schedule"
)]
struct Cli {
    /// Config file (default: ~/.flowdeck/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway and the scheduler
    Serve {
        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Do not start the scheduler until init or a scheduled save
        #[arg(long)]
        no_autostart: bool,
    },
    /// List saved workflows
    List,
    /// Print one workflow as JSON
    Show {
        /// Workflow id
        id: String,
    },
    /// Fire every due workflow once, then exit
    Scan,
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .as_deref()
        .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
        .unwrap_or_else(FlowdeckConfig::default_path)
}

fn load_config(path: &Path) -> Result<FlowdeckConfig> {
    if path.exists() {
        FlowdeckConfig::load_from(path).with_context(|| format!("loading {}", path.display()))
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        Ok(FlowdeckConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "flowdeck=debug,flowdeck_gateway=debug,flowdeck_scheduler=debug,tower_http=debug"
    } else {
        "flowdeck=info,flowdeck_gateway=info,flowdeck_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let path = config_path(&cli);

    match cli.command.unwrap_or(Command::Serve {
        port: None,
        host: None,
        no_autostart: false,
    }) {
        Command::InitConfig { force } => {
            if path.exists() && !force {
                println!("⚠️  Config already exists: {} (use --force to overwrite)", path.display());
                return Ok(());
            }
            FlowdeckConfig::default().save_to(&path)?;
            println!("✅ Wrote default config to {}", path.display());
        }
        Command::Serve {
            port,
            host,
            no_autostart,
        } => {
            let mut config = load_config(&path)?;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if no_autostart {
                config.scheduler.autostart = false;
            }
            tracing::info!(
                "⏰ Flowdeck v{} (store={:?}, poll={}s)",
                env!("CARGO_PKG_VERSION"),
                config.store.backend,
                config.scheduler.poll_interval_secs
            );
            let state = AppState::from_config(config)?;
            flowdeck_gateway::start(state).await?;
        }
        Command::List => {
            let state = AppState::from_config(load_config(&path)?)?;
            let workflows = state.service.list().await?;
            if workflows.is_empty() {
                println!("No workflows saved.");
            }
            for wf in workflows {
                let schedule = if wf.schedule.is_active() {
                    wf.schedule.schedule_type.to_string()
                } else {
                    "-".to_string()
                };
                println!(
                    "{:<44} {:<10} {:>3} nodes  {}  {}",
                    wf.id,
                    schedule,
                    wf.node_count,
                    wf.updated_at.format("%Y-%m-%d %H:%M"),
                    wf.name
                );
            }
        }
        Command::Show { id } => {
            let state = AppState::from_config(load_config(&path)?)?;
            let workflow = state.service.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&workflow)?);
        }
        Command::Scan => {
            let state = AppState::from_config(load_config(&path)?)?;
            let report = state.bootstrap().scheduler().scan().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
