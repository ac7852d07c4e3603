// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use flowsmith_core::domain::deployer_config::DeployerConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./flowsmith.yaml)
        #[arg(short, long, default_value = "./flowsmith.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(output).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = DeployerConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. FLOWSMITH_CONFIG_PATH: {}",
            std::env::var("FLOWSMITH_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./flowsmith.yaml");
        println!("  4. ~/.flowsmith/config.yaml");
        println!("  5. /etc/flowsmith/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    let nifi = &config.spec.nifi;
    println!("{}", "NiFi:".bold());
    println!("  Base URL: {}", nifi.base_url);
    println!("  Username: {}", nifi.username.as_deref().unwrap_or("(none)"));
    println!(
        "  Password: {}",
        if nifi.password.is_some() { "<redacted>" } else { "(none)" }
    );
    println!("  Token: {}", if nifi.token.is_some() { "<redacted>" } else { "(none)" });
    println!("  Verify TLS: {}", nifi.verify_tls);
    println!("  Timeout: {:?}", nifi.timeout);
    println!();

    let deploy = &config.spec.deploy;
    println!("{}", "Deploy:".bold());
    println!(
        "  Retries: {} every {:?}",
        deploy.retry_attempts, deploy.retry_delay
    );
    println!(
        "  Polling: every {:?} for up to {:?}",
        deploy.poll_interval, deploy.poll_timeout
    );
    println!("  Controller services: {}", deploy.controller_services.len());
    for (name, id) in &deploy.controller_services {
        println!("    - {} → {}", name, id);
    }
    println!("  Purge root: {}", deploy.purge_root);
    println!("  Root services: {}", deploy.root_services.len());
    for entry in &deploy.root_services {
        println!(
            "    - {} → {} ({}{})",
            entry.key,
            entry.name,
            entry.service_type,
            if entry.auto_enable { "" } else { ", disabled" }
        );
    }
    println!();

    let check = &config.spec.layout_check;
    println!("{}", "Layout check:".bold());
    println!("  min_dx: {}", check.min_dx);
    println!("  vertical_tolerance: {}", check.vertical_tolerance);
    println!("  min_separation: {}", check.min_separation);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = DeployerConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf) -> Result<()> {
    let sample = include_str!("../../templates/config-minimal.yaml");

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
