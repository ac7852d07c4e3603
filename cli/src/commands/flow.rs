// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Flow command implementations
//!
//! # Commands
//!
//! - `flowsmith flow validate <file>` - Parse, lay out and summarize a spec
//! - `flowsmith flow deploy <file>` - Deploy a spec to NiFi
//! - `flowsmith flow topology <file>` - Compare the live canvas with a spec
//! - `flowsmith flow layout` - Check layout heuristics on the live canvas

use anyhow::{anyhow, Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flowsmith_core::application::deploy_flow::{DeployFlowUseCase, StandardDeployFlowUseCase};
use flowsmith_core::application::layout_validator::{LayoutReport, LayoutValidator};
use flowsmith_core::application::topology_validator::{TopologyReport, TopologyValidator};
use flowsmith_core::domain::deployer_config::DeployerConfigManifest;
use flowsmith_core::domain::deployment::DeploymentOutcome;
use flowsmith_core::domain::flow::{FlowSpec, FlowSummary};
use flowsmith_core::infrastructure::flow_parser::FlowParser;
use flowsmith_core::infrastructure::nifi_client::NifiClient;

/// Exit status when a check finds problems.
const ISSUES_FOUND: i32 = 2;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum FlowCommand {
    /// Parse and lay out a flow spec without touching NiFi
    Validate {
        /// Path to flow spec YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Deploy a flow spec
    Deploy {
        /// Path to flow spec YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Only parse, lay out and summarize
        #[arg(long)]
        dry_run: bool,

        /// Existing controller service to use (property key, API type or class name)
        #[arg(long = "service", value_name = "KEY=ID", value_parser = parse_service)]
        services: Vec<(String, String)>,

        /// Keep existing root-level components instead of clearing the canvas root
        #[arg(long)]
        no_purge: bool,

        #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Compare the live canvas against a flow spec
    Topology {
        /// Path to flow spec YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Check layout heuristics on the live canvas
    Layout {
        /// Minimum rightward offset for processor connections
        #[arg(long)]
        min_dx: Option<f64>,

        /// Horizontal offset under which a connection counts as vertical
        #[arg(long)]
        tolerance: Option<f64>,

        /// Minimum distance between components on both axes
        #[arg(long)]
        min_separation: Option<f64>,

        #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

/// Run a flow command; returns the process exit status.
pub async fn handle_command(command: FlowCommand, config_override: Option<PathBuf>) -> Result<i32> {
    match command {
        FlowCommand::Validate { file, output } => {
            let spec = load_spec(&file)?;
            print_summary(&dry_run(&spec), output)?;
            Ok(0)
        }
        FlowCommand::Deploy {
            file,
            dry_run: true,
            output,
            ..
        } => {
            let spec = load_spec(&file)?;
            print_summary(&dry_run(&spec), output)?;
            Ok(0)
        }
        FlowCommand::Deploy {
            file,
            services,
            no_purge,
            output,
            ..
        } => deploy(&file, services, no_purge, config_override, output).await,
        FlowCommand::Topology { file, output } => topology(&file, config_override, output).await,
        FlowCommand::Layout {
            min_dx,
            tolerance,
            min_separation,
            output,
        } => layout(min_dx, tolerance, min_separation, config_override, output).await,
    }
}

fn load_spec(file: &Path) -> Result<FlowSpec> {
    FlowParser::parse_file(file).with_context(|| format!("Failed to load flow spec {:?}", file))
}

fn load_config(config_override: Option<PathBuf>) -> Result<DeployerConfigManifest> {
    let config = DeployerConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

fn dry_run(spec: &FlowSpec) -> FlowSummary {
    flowsmith_core::domain::layout::apply(spec).summary()
}

async fn deploy(
    file: &Path,
    services: Vec<(String, String)>,
    no_purge: bool,
    config_override: Option<PathBuf>,
    output: OutputFormat,
) -> Result<i32> {
    let spec = load_spec(file)?;
    let config = load_config(config_override)?;
    let client = Arc::new(NifiClient::connect(&config.spec.nifi).await?);

    let mut settings = config.spec.deploy;
    if no_purge {
        settings.purge_root = false;
    }
    if !settings.purge_root {
        tracing::info!("Keeping existing root-level components");
    }

    println!("Deploying {} to {}...", file.display(), client.base_url());
    let use_case = StandardDeployFlowUseCase::new(client.clone(), client, settings);
    let services: BTreeMap<String, String> = services.into_iter().collect();
    let outcome = use_case
        .deploy(&spec, &services)
        .await
        .context("Deployment failed")?;

    print_outcome(&outcome, output)?;
    Ok(0)
}

async fn topology(file: &Path, config_override: Option<PathBuf>, output: OutputFormat) -> Result<i32> {
    let spec = load_spec(file)?;
    let config = load_config(config_override)?;
    let client = Arc::new(NifiClient::connect(&config.spec.nifi).await?);

    let report = TopologyValidator::new(client)
        .validate(&spec)
        .await
        .context("Failed to read the live flow")?;
    print_topology(&report, output)?;
    Ok(if report.ok { 0 } else { ISSUES_FOUND })
}

async fn layout(
    min_dx: Option<f64>,
    tolerance: Option<f64>,
    min_separation: Option<f64>,
    config_override: Option<PathBuf>,
    output: OutputFormat,
) -> Result<i32> {
    let config = load_config(config_override)?;
    let mut settings = config.spec.layout_check.clone();
    if let Some(value) = min_dx {
        settings.min_dx = value;
    }
    if let Some(value) = tolerance {
        settings.vertical_tolerance = value;
    }
    if let Some(value) = min_separation {
        settings.min_separation = value;
    }

    let client = Arc::new(NifiClient::connect(&config.spec.nifi).await?);
    let report = LayoutValidator::new(client, settings)
        .validate()
        .await
        .context("Failed to read the live flow")?;
    print_layout(&report, output)?;
    Ok(if report.overlaps.is_empty() { 0 } else { ISSUES_FOUND })
}

fn parse_service(value: &str) -> Result<(String, String)> {
    let (key, id) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=ID, got '{}'", value))?;
    let (key, id) = (key.trim(), id.trim());
    if key.is_empty() || id.is_empty() {
        return Err(anyhow!("expected KEY=ID, got '{}'", value));
    }
    Ok((key.to_string(), id.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_summary(summary: &FlowSummary, output: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = output {
        return print_json(summary);
    }
    println!("{}", "✓ Flow spec is valid".green());
    println!("  Root: {}", summary.root_group.bold());
    println!("  Process groups:");
    for name in &summary.process_group_names {
        println!("    - {}", name);
    }
    println!("  Processors: {}", summary.processors);
    println!("  Connections: {}", summary.connections);
    println!("  Ports: {} in, {} out", summary.input_ports, summary.output_ports);
    Ok(())
}

fn print_outcome(outcome: &DeploymentOutcome, output: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = output {
        return print_json(outcome);
    }
    println!("{}", "✓ Flow deployed".green());
    println!("{}", "Process groups:".bold());
    for (path, id) in &outcome.groups {
        println!("  {} → {}", path, id.dimmed());
    }
    if !outcome.provisioned_services.is_empty() {
        println!("{}", "Placeholder controller services (disabled):".bold());
        for service in &outcome.provisioned_services {
            println!("  {} ({}) → {}", service.name, service.service_type, service.id.dimmed());
        }
    }
    println!(
        "Created {} processors, {} connections, {} input ports, {} output ports",
        outcome.processors, outcome.connections, outcome.input_ports, outcome.output_ports
    );
    Ok(())
}

fn print_topology(report: &TopologyReport, output: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = output {
        return print_json(report);
    }
    if report.ok {
        println!("{}", "✓ Live topology matches the spec".green());
        return Ok(());
    }
    println!("{}", format!("✗ {} topology issue(s)", report.issues.len()).red());
    for issue in &report.issues {
        println!("  [{}] {}: {}", issue.error.yellow(), issue.path, issue.message);
    }
    Ok(())
}

fn print_layout(report: &LayoutReport, output: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = output {
        return print_json(report);
    }
    if report.is_clean() {
        println!("{}", "✓ Layout checks passed".green());
        return Ok(());
    }
    for overlap in &report.overlaps {
        println!(
            "  {} {}: {} {} overlaps {} {}",
            "overlap".red(),
            overlap.path,
            overlap.a_kind.as_str(),
            overlap.a_position,
            overlap.b_kind.as_str(),
            overlap.b_position
        );
    }
    for violation in &report.left_to_right_violations {
        println!(
            "  {} {}: {} {} -> {} {} (dx {:.0})",
            "right-to-left".yellow(),
            violation.path,
            violation.source,
            violation.source_position,
            violation.destination,
            violation.destination_position,
            violation.dx
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(clap::Parser)]
    struct Harness {
        #[command(subcommand)]
        command: FlowCommand,
    }

    #[test]
    fn test_deploy_accepts_no_purge() {
        use clap::Parser;
        let parsed = Harness::try_parse_from(["flow", "deploy", "flow.yaml", "--no-purge"]).unwrap();
        assert!(matches!(parsed.command, FlowCommand::Deploy { no_purge: true, .. }));

        let parsed = Harness::try_parse_from(["flow", "deploy", "flow.yaml"]).unwrap();
        assert!(matches!(parsed.command, FlowCommand::Deploy { no_purge: false, .. }));
    }

    #[test]
    fn test_parse_service_pairs() {
        assert_eq!(
            parse_service("ssl-context=4f2c").unwrap(),
            ("ssl-context".to_string(), "4f2c".to_string())
        );
        assert!(parse_service("no-separator").is_err());
        assert!(parse_service("=id").is_err());
    }
}
