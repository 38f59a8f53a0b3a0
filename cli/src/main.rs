// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Concord CLI
//!
//! The `concord` binary asks several LLM providers the same question and
//! reports where they agree and where they conflict.
//!
//! ## Commands
//!
//! - `concord analyze` - One-shot fan-out and consensus analysis
//! - `concord serve` - HTTP API (`/api/analyze`, `/api/circuit-breakers`, `/health`)
//! - `concord config show|validate|generate` - Configuration management
//!
//! API keys are read from the configuration file (`env:VAR` references are
//! resolved) or from the conventional provider variables such as
//! `OPENAI_API_KEY`. A `.env` file in the working directory is loaded first.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use concord_cli::commands::{self, AnalyzeArgs, ConfigCommand, ServeArgs};
use concord_core::domain::config::{LoggingConfig, OrchestratorConfigManifest};

/// Concord - ask many models, compare their answers
#[derive(Parser)]
#[command(name = "concord")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CONCORD_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send text to every configured provider and analyse the answers
    #[command(name = "analyze")]
    Analyze(AnalyzeArgs),

    /// Run the HTTP API server
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is the normal case
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Logging settings come from the config file when it loads; commands
    // report load errors themselves
    let logging = OrchestratorConfigManifest::load_or_default(cli.config.clone())
        .map(|manifest| manifest.spec.observability.logging)
        .unwrap_or_default();
    init_logging(cli.log_level.as_deref(), &logging)?;

    match cli.command {
        Some(Commands::Analyze(args)) => commands::analyze::execute(args, cli.config).await,
        Some(Commands::Serve(args)) => commands::serve::execute(args, cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging.
///
/// `RUST_LOG` wins over `--log-level`, which wins over the configured level.
fn init_logging(cli_level: Option<&str>, config: &LoggingConfig) -> Result<()> {
    let level = cli_level.unwrap_or(&config.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
