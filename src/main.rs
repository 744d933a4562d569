//! Strata - incremental OCI image builder
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::io::IsTerminal;
use std::process::ExitCode;
use strata::cli::{Cli, Commands};
use strata::config::{Config, ConfigManager};
use strata::error::{StrataError, StrataResult};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> StrataResult<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd =
            std::env::current_dir().map_err(|e| StrataError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let mut config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;
    apply_overrides(&cli, &mut config);

    init_logging(cli.verbose, &config.general.log_format);
    if let Some(path) = &local_config_path {
        debug!("Using local config: {}", path.display());
    }
    if std::io::stdout().is_terminal() {
        strata::ui::init_theme();
    }

    match cli.command {
        Commands::Build(args) => strata::cli::commands::build(args, &config).await,
        Commands::Inspect(args) => strata::cli::commands::inspect(args, &config).await,
        Commands::Clean(args) => strata::cli::commands::clean(args, &config).await,
        Commands::Config(args) => {
            strata::cli::commands::config(args, &config, &config_manager).await
        }
        Commands::Status => strata::cli::commands::status(&config).await,
    }
}

/// Directory flags win over every config file
fn apply_overrides(cli: &Cli, config: &mut Config) {
    if let Some(dir) = &cli.strata_dir {
        config.paths.strata_dir = dir.clone();
    }
    if let Some(dir) = &cli.oci_dir {
        config.paths.oci_dir = dir.clone();
    }
    if let Some(dir) = &cli.roots_dir {
        config.paths.roots_dir = dir.clone();
    }
}

/// 0 = warn (progress output only), 1 = info, 2+ = debug; RUST_LOG wins
fn init_logging(verbose: u8, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("strata=warn"),
        1 => EnvFilter::new("strata=info"),
        _ => EnvFilter::new("strata=debug"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
