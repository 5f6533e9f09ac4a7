//! Shardmap: failure-domain-aware partition placement for sharded clusters.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use shardmap_core::{Config, LogFormat};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli.config.as_deref().map(load_config).transpose()?;
    init_logging(config.as_ref().unwrap_or(&Config::default()))?;
    if let Some(path) = &cli.config {
        debug!(path = %path.display(), "Loaded configuration");
    }

    let config = config.as_ref();
    let format = cli.format;
    let output = match &cli.command {
        Commands::Build(args) => commands::handle_build(args, config, format)?,
        Commands::AddHosts(args) => commands::handle_add_hosts(args, config, format)?,
        Commands::RemoveHosts(args) => commands::handle_remove_hosts(args, format)?,
        Commands::Recover(args) => commands::handle_recover(args, format)?,
        Commands::Restore(args) => commands::handle_restore(args, config, format)?,
        Commands::Validate(args) => commands::handle_validate(args, format)?,
        Commands::Groups(args) => commands::handle_groups(args, format)?,
        Commands::Route(args) => commands::handle_route(args, format)?,
        Commands::Version => format!("shardmap {}", env!("CARGO_PKG_VERSION")),
    };

    println!("{}", output.trim_end());
    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    // Logs go to stderr so command output stays parseable.
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }

    Ok(())
}
