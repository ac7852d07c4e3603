// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Layout heuristics checked against the live canvas.
//!
//! Two rules, applied per group:
//! - a processor -> processor connection must point right by at least `min_dx`,
//!   unless it is near-vertical (`|dx| <= vertical_tolerance`)
//! - no two processors or ports may sit within `min_separation` of each other
//!   on both axes

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::application::live_walk::walk_subtree;
use crate::domain::deployer_config::LayoutCheckSettings;
use crate::domain::flow::{ConnectableKind, Position};
use crate::domain::live_system::{FlowApi, GroupFlow, LiveSystemError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlap {
    pub path: String,
    pub a: String,
    pub a_kind: ConnectableKind,
    pub a_position: Position,
    pub b: String,
    pub b_kind: ConnectableKind,
    pub b_position: Position,
    pub min_separation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeftToRightViolation {
    pub path: String,
    pub source: String,
    pub destination: String,
    pub source_position: Position,
    pub destination_position: Position,
    pub dx: f64,
    pub min_dx: f64,
    pub vertical_tolerance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayoutReport {
    pub overlaps: Vec<Overlap>,
    pub left_to_right_violations: Vec<LeftToRightViolation>,
}

impl LayoutReport {
    pub fn is_clean(&self) -> bool {
        self.overlaps.is_empty() && self.left_to_right_violations.is_empty()
    }
}

pub struct LayoutValidator {
    api: Arc<dyn FlowApi>,
    settings: LayoutCheckSettings,
}

impl LayoutValidator {
    pub fn new(api: Arc<dyn FlowApi>, settings: LayoutCheckSettings) -> Self {
        Self { api, settings }
    }

    /// Check every live group reachable from the canvas root.
    pub async fn validate(&self) -> Result<LayoutReport, LiveSystemError> {
        let root_id = self.api.root_group_id().await?;
        let groups = walk_subtree(self.api.as_ref(), &root_id).await?;

        let mut report = LayoutReport::default();
        for group in &groups {
            self.check_direction(&group.path, &group.flow, &mut report);
            self.check_overlaps(&group.path, &group.flow, &mut report);
        }

        tracing::info!(
            "Layout check: {} overlap(s), {} left-to-right violation(s) across {} group(s)",
            report.overlaps.len(),
            report.left_to_right_violations.len(),
            groups.len()
        );
        Ok(report)
    }

    fn check_direction(&self, path: &str, flow: &GroupFlow, report: &mut LayoutReport) {
        let positions: HashMap<&str, Position> = flow
            .processors
            .iter()
            .map(|p| (p.id.as_str(), p.position))
            .collect();

        for connection in &flow.connections {
            if connection.source.kind != ConnectableKind::Processor
                || connection.destination.kind != ConnectableKind::Processor
            {
                continue;
            }
            let (Some(&from), Some(&to)) = (
                positions.get(connection.source.id.as_str()),
                positions.get(connection.destination.id.as_str()),
            ) else {
                continue;
            };

            let dx = to.x - from.x;
            let near_vertical = dx.abs() <= self.settings.vertical_tolerance;
            if !near_vertical && dx < self.settings.min_dx {
                report.left_to_right_violations.push(LeftToRightViolation {
                    path: path.to_string(),
                    source: connection.source.id.clone(),
                    destination: connection.destination.id.clone(),
                    source_position: from,
                    destination_position: to,
                    dx,
                    min_dx: self.settings.min_dx,
                    vertical_tolerance: self.settings.vertical_tolerance,
                });
            }
        }
    }

    fn check_overlaps(&self, path: &str, flow: &GroupFlow, report: &mut LayoutReport) {
        let components: Vec<(&str, ConnectableKind, Position)> = flow
            .processors
            .iter()
            .map(|p| (p.id.as_str(), ConnectableKind::Processor, p.position))
            .chain(
                flow.input_ports
                    .iter()
                    .chain(flow.output_ports.iter())
                    .map(|p| (p.id.as_str(), p.kind, p.position)),
            )
            .collect();

        let limit = self.settings.min_separation;
        for (i, &(a, a_kind, a_position)) in components.iter().enumerate() {
            for &(b, b_kind, b_position) in &components[i + 1..] {
                if (a_position.x - b_position.x).abs() < limit
                    && (a_position.y - b_position.y).abs() < limit
                {
                    report.overlaps.push(Overlap {
                        path: path.to_string(),
                        a: a.to_string(),
                        a_kind,
                        a_position,
                        b: b.to_string(),
                        b_kind,
                        b_position,
                        min_separation: limit,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::live_system::{ConnectableRef, NewConnection, NewPort, NewProcessGroup, NewProcessor};
    use crate::domain::metadata::Bundle;
    use crate::infrastructure::in_memory::InMemoryFlowApi;
    use std::collections::BTreeMap;

    fn settings() -> LayoutCheckSettings {
        LayoutCheckSettings {
            min_dx: 50.0,
            vertical_tolerance: 15.0,
            min_separation: 40.0,
        }
    }

    async fn group(api: &InMemoryFlowApi) -> String {
        let root = api.root_group_id().await.unwrap();
        api.create_process_group(
            &root,
            &NewProcessGroup {
                name: "G".to_string(),
                position: Position::new(0.0, 0.0),
                comments: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn processor(api: &InMemoryFlowApi, group_id: &str, name: &str, x: f64, y: f64) -> String {
        api.create_processor(
            group_id,
            &NewProcessor {
                name: name.to_string(),
                processor_type: "org.example.Step".to_string(),
                bundle: Bundle {
                    group: "org.example".to_string(),
                    artifact: "example-nar".to_string(),
                    version: "1.0".to_string(),
                },
                position: Position::new(x, y),
                properties: BTreeMap::new(),
                scheduling: Default::default(),
                auto_terminated_relationships: vec![],
                comments: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn connect(api: &InMemoryFlowApi, group_id: &str, from: &str, to: &str) {
        let endpoint = |id: &str| ConnectableRef {
            id: id.to_string(),
            group_id: group_id.to_string(),
            kind: ConnectableKind::Processor,
            name: None,
        };
        api.create_connection(
            group_id,
            &NewConnection {
                name: format!("{}-to-{}", from, to),
                source: endpoint(from),
                destination: endpoint(to),
                relationships: vec!["success".to_string()],
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_reversed_connection_is_a_violation() {
        let api = InMemoryFlowApi::new();
        let g = group(&api).await;
        let a = processor(&api, &g, "A", 200.0, 0.0).await;
        let b = processor(&api, &g, "B", 230.0, 200.0).await;
        connect(&api, &g, &b, &a).await;

        let report = LayoutValidator::new(Arc::new(api), settings())
            .validate()
            .await
            .unwrap();
        assert_eq!(report.left_to_right_violations.len(), 1);
        assert_eq!(report.left_to_right_violations[0].path, "NiFi Flow/G");
        assert_eq!(report.left_to_right_violations[0].dx, -30.0);
    }

    #[tokio::test]
    async fn test_near_vertical_connection_is_allowed() {
        let api = InMemoryFlowApi::new();
        let g = group(&api).await;
        let a = processor(&api, &g, "A", 200.0, 0.0).await;
        let b = processor(&api, &g, "B", 210.0, 80.0).await;
        connect(&api, &g, &a, &b).await;

        let report = LayoutValidator::new(Arc::new(api), settings())
            .validate()
            .await
            .unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_port_on_top_of_processor_overlaps() {
        let api = InMemoryFlowApi::new();
        let g = group(&api).await;
        processor(&api, &g, "P", 100.0, 100.0).await;
        api.create_port(
            &g,
            &NewPort {
                name: "in".to_string(),
                kind: ConnectableKind::InputPort,
                position: Position::new(110.0, 120.0),
                allow_remote_access: false,
                comments: None,
            },
        )
        .await
        .unwrap();

        let report = LayoutValidator::new(Arc::new(api), settings())
            .validate()
            .await
            .unwrap();
        assert_eq!(report.overlaps.len(), 1);
        assert_eq!(report.overlaps[0].b_kind, ConnectableKind::InputPort);
    }

    #[tokio::test]
    async fn test_moved_processor_is_rechecked() {
        let api = InMemoryFlowApi::new();
        let g = group(&api).await;
        let a = processor(&api, &g, "A", 0.0, 0.0).await;
        let b = processor(&api, &g, "B", 400.0, 0.0).await;
        connect(&api, &g, &a, &b).await;

        let validator = LayoutValidator::new(Arc::new(api.clone()), settings());
        assert!(validator.validate().await.unwrap().is_clean());

        // Dragging B onto A overlaps and leaves a short rightward hop
        assert!(api.set_processor_position(&b, Position::new(20.0, 10.0)));
        let report = validator.validate().await.unwrap();
        assert_eq!(report.overlaps.len(), 1);
        assert_eq!(report.left_to_right_violations.len(), 1);
        assert_eq!(report.left_to_right_violations[0].dx, 20.0);
        assert!(!api.set_processor_position("missing", Position::new(0.0, 0.0)));
    }
}
