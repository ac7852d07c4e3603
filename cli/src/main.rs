// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Flowsmith CLI
//!
//! The `flowsmith` binary deploys declarative flow specifications to a NiFi
//! instance and checks the result.
//!
//! ## Commands
//!
//! - `flowsmith flow validate|deploy|topology|layout` - Flow operations
//! - `flowsmith config show|validate|generate` - Configuration management
//!
//! Exit status is 2 when a topology or layout check finds problems.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

use commands::{ConfigCommand, FlowCommand};

/// Flowsmith - declarative NiFi flow deployment
#[derive(Parser)]
#[command(name = "flowsmith")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "FLOWSMITH_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "FLOWSMITH_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Flow deployment and validation
    #[command(name = "flow")]
    Flow {
        #[command(subcommand)]
        command: FlowCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let exit_code = match cli.command {
        Some(Commands::Flow { command }) => commands::flow::handle_command(command, cli.config).await?,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await?;
            0
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            1
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}
