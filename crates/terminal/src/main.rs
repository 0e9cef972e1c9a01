mod cli;
mod commands;

use std::path::Path;
use std::time::Duration;

use clap::Parser;

use forgepos_offline::{OfflineConfig, OfflineRuntime, StoreLocation};

use crate::cli::{Cli, Command};

fn build_config(cli: &Cli) -> anyhow::Result<OfflineConfig> {
    let mut config = OfflineConfig::from_env()?;

    if let Some(url) = &cli.api_url {
        config = config.with_api_base_url(url);
    }
    if let Some(db) = &cli.db {
        let location = if db == Path::new(":memory:") {
            StoreLocation::InMemory
        } else {
            StoreLocation::File(db.clone())
        };
        config = config.with_store(location);
    }
    if let Some(token) = &cli.token {
        config = config.with_auth_token(token);
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.with_request_timeout(Duration::from_millis(ms));
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    forgepos_observability::init_with(cli.log_format);

    let config = build_config(&cli)?;
    tracing::debug!(api = %config.api_base_url, store = ?config.store, "configuration loaded");

    let runtime = OfflineRuntime::new(config)?;
    runtime.initialize().await?;
    if !runtime.is_offline_enabled() {
        tracing::warn!("offline store unavailable; running online-only");
    }

    let result = match cli.command {
        Command::Run => commands::run(&runtime).await,
        Command::Submit(args) => commands::submit(&runtime, args).await,
        Command::Sale(args) => commands::sale(&runtime, args).await,
        Command::Status => commands::status(&runtime).await,
        Command::Sync => commands::sync(&runtime).await,
        Command::Queue => commands::queue(&runtime).await,
        Command::ClearQueue { yes } => commands::clear_queue(&runtime, yes).await,
        Command::Transactions => commands::transactions(&runtime).await,
        Command::RefreshCache { kinds } => commands::refresh_cache(&runtime, kinds).await,
        Command::Table(command) => commands::table(&runtime, command).await,
    };

    runtime.dispose().await;
    result
}
