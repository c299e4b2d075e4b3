pub mod cli;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod fetch;
pub mod models;
pub mod reconcile;
pub mod services;
pub mod store;

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
pub use config::Config;
use daemon::{AppState, Daemon};
use domain::events::TracingSink;

pub async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Daemon) => run_daemon(config).await,

        Some(Commands::Sync) => cli::commands::cmd_sync(&config).await,

        Some(Commands::List) => cli::commands::cmd_list(&config).await,

        Some(Commands::Info { id }) => cli::commands::cmd_info(&config, &id).await,

        Some(Commands::Videos { source }) => {
            cli::commands::cmd_videos(&config, source.as_deref()).await
        }

        Some(Commands::Validate) => cli::commands::cmd_validate(&config).await,

        Some(Commands::Init) => {
            if Config::create_default_if_missing()? {
                println!("✓ Config file created. Edit config.toml and run again.");
            } else {
                println!("Config file already exists.");
            }
            Ok(())
        }

        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    info!(
        "demoarr v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let state = Arc::new(AppState::new(config.clone(), Arc::new(TracingSink))?);
    let daemon = Arc::new(Daemon::new(Arc::clone(&state), config.scheduler.clone()));

    let daemon_handle = {
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            if let Err(e) = daemon.start().await {
                error!("Scheduler error: {e:#}");
            }
        })
    };

    info!("Daemon running. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(e) => {
            error!("Error listening for shutdown: {e}");
        }
    }

    daemon.stop().await;
    daemon_handle.abort();
    info!("Daemon stopped");

    Ok(())
}
