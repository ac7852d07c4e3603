// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Topology Validator
//!
//! Re-reads the live group tree and compares every child group declared under
//! the flow spec root against it. Discrepancies are collected into a
//! [`TopologyReport`]; the validator only fails when the live system cannot be
//! read at all.
//!
//! # Issue Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | `process-group-missing` | no live child with the declared name |
//! | `processors-missing` / `processors-unexpected` | processor count differs |
//! | `processor-missing` | declared (name, type) pair absent |
//! | `input-port-missing` / `output-port-missing` | declared port name absent |
//! | `connection-missing` | declared (source, destination) name pair absent |
//! | `empty-process-group` | declared group has no processors, ports or children |

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::domain::flow::{EndpointLookup, FlowSpec, ProcessGroupSpec};
use crate::domain::live_system::{FlowApi, GroupFlow, LiveProcessGroup, LiveSystemError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyIssue {
    pub path: String,
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyReport {
    pub ok: bool,
    pub issues: Vec<TopologyIssue>,
}

impl TopologyReport {
    pub fn count(&self, error: &str) -> usize {
        self.issues.iter().filter(|i| i.error == error).count()
    }
}

pub struct TopologyValidator {
    api: Arc<dyn FlowApi>,
}

impl TopologyValidator {
    pub fn new(api: Arc<dyn FlowApi>) -> Self {
        Self { api }
    }

    pub async fn validate(&self, spec: &FlowSpec) -> Result<TopologyReport, LiveSystemError> {
        let root_id = self.api.root_group_id().await?;
        let root = self.api.group_flow(&root_id).await?;

        let mut issues = Vec::new();
        let mut pending: Vec<(&ProcessGroupSpec, String, Vec<LiveProcessGroup>)> = spec
            .root
            .child_groups
            .iter()
            .rev()
            .map(|child| {
                (
                    child,
                    format!("{}/{}", spec.root.name, child.name),
                    root.child_groups.clone(),
                )
            })
            .collect();

        while let Some((group, path, siblings)) = pending.pop() {
            let Some(live) = siblings.iter().find(|g| g.name == group.name) else {
                issues.push(issue(
                    &path,
                    "process-group-missing",
                    format!("process group '{}' was not found", group.name),
                ));
                continue;
            };

            let flow = self.api.group_flow(&live.id).await?;
            self.check_group(group, &path, &flow, &mut issues).await?;

            for child in group.child_groups.iter().rev() {
                pending.push((
                    child,
                    format!("{}/{}", path, child.name),
                    flow.child_groups.clone(),
                ));
            }
        }

        tracing::info!("Topology validation found {} issue(s)", issues.len());
        Ok(TopologyReport {
            ok: issues.is_empty(),
            issues,
        })
    }

    async fn check_group(
        &self,
        group: &ProcessGroupSpec,
        path: &str,
        flow: &GroupFlow,
        issues: &mut Vec<TopologyIssue>,
    ) -> Result<(), LiveSystemError> {
        let expected = group.processors.len();
        let actual = flow.processors.len();
        if actual < expected {
            issues.push(issue(
                path,
                "processors-missing",
                format!("expected {} processors, found {}", expected, actual),
            ));
        } else if actual > expected {
            issues.push(issue(
                path,
                "processors-unexpected",
                format!("expected {} processors, found {}", expected, actual),
            ));
        }

        let live_processors: HashSet<(&str, &str)> = flow
            .processors
            .iter()
            .map(|p| (p.name.as_str(), p.processor_type.as_str()))
            .collect();
        for processor in &group.processors {
            if !live_processors.contains(&(processor.name.as_str(), processor.processor_type.as_str())) {
                issues.push(issue(
                    path,
                    "processor-missing",
                    format!(
                        "processor '{}' of type {} was not found",
                        processor.name, processor.processor_type
                    ),
                ));
            }
        }

        for (declared, live, code) in [
            (&group.input_ports, &flow.input_ports, "input-port-missing"),
            (&group.output_ports, &flow.output_ports, "output-port-missing"),
        ] {
            for port in declared {
                if !live.iter().any(|p| p.name == port.name) {
                    issues.push(issue(path, code, format!("port '{}' was not found", port.name)));
                }
            }
        }

        // Connections may cross into immediate children, so their ports resolve too
        let mut names: HashMap<&str, &str> = HashMap::new();
        for p in &flow.processors {
            names.insert(&p.id, &p.name);
        }
        for p in flow.input_ports.iter().chain(flow.output_ports.iter()) {
            names.insert(&p.id, &p.name);
        }
        let mut child_flows = Vec::with_capacity(flow.child_groups.len());
        for child in &flow.child_groups {
            child_flows.push(self.api.group_flow(&child.id).await?);
        }
        for child in &child_flows {
            for p in child.input_ports.iter().chain(child.output_ports.iter()) {
                names.insert(&p.id, &p.name);
            }
        }

        let live_connections: HashSet<(&str, &str)> = flow
            .connections
            .iter()
            .filter_map(|c| {
                Some((
                    *names.get(c.source.id.as_str())?,
                    *names.get(c.destination.id.as_str())?,
                ))
            })
            .collect();

        for connection in &group.connections {
            let (EndpointLookup::Found(source), EndpointLookup::Found(destination)) = (
                group.resolve_endpoint(&connection.source),
                group.resolve_endpoint(&connection.destination),
            ) else {
                continue;
            };
            if !live_connections.contains(&(source.name, destination.name)) {
                issues.push(issue(
                    path,
                    "connection-missing",
                    format!(
                        "connection '{}' ({} -> {}) was not found",
                        connection.name, source.name, destination.name
                    ),
                ));
            }
        }

        if group.is_empty() {
            issues.push(issue(
                path,
                "empty-process-group",
                "process group has no processors, ports or child groups".to_string(),
            ));
        }
        Ok(())
    }
}

fn issue(path: &str, error: &str, message: String) -> TopologyIssue {
    TopologyIssue {
        path: path.to_string(),
        error: error.to_string(),
        message,
    }
}
