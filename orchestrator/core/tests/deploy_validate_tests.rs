// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the deploy / validate round trip
//!
//! These tests drive the full pipeline against the in-memory live system:
//! 1. Parse flow YAML
//! 2. Deploy through the use case (layout, preparation, provisioning)
//! 3. Re-read the canvas with the topology and layout validators

use flowsmith_core::application::deploy_flow::{DeployFlowUseCase, StandardDeployFlowUseCase};
use flowsmith_core::application::layout_validator::LayoutValidator;
use flowsmith_core::application::metadata_resolver::CachingMetadataResolver;
use flowsmith_core::application::prepare::prepare_flow;
use flowsmith_core::application::topology_validator::TopologyValidator;
use flowsmith_core::domain::deployer_config::{DeploySettings, LayoutCheckSettings};
use flowsmith_core::domain::layout::{self, LANE_WIDTH};
use flowsmith_core::domain::metadata::{Bundle, RelationshipDescriptor, TypeMetadataProvider, TypeSchema};
use flowsmith_core::infrastructure::flow_parser::FlowParser;
use flowsmith_core::infrastructure::in_memory::InMemoryFlowApi;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const GENERATE: &str = "org.apache.nifi.processors.standard.GenerateFlowFile";
const LOG: &str = "org.apache.nifi.processors.standard.LogAttribute";

const PIPELINE: &str = r#"
process_group:
  name: NiFi Flow
  process_groups:
    - name: Pipeline
      processors:
        - id: gen
          name: gen
          type: org.apache.nifi.processors.standard.GenerateFlowFile
        - id: log
          name: log
          type: org.apache.nifi.processors.standard.LogAttribute
      connections:
        - source: gen
          destination: log
          relationships: [success]
"#;

fn schema(component_type: &str, relationships: &[&str]) -> TypeSchema {
    TypeSchema {
        component_type: component_type.to_string(),
        bundle: Bundle {
            group: "org.apache.nifi".to_string(),
            artifact: "nifi-standard-nar".to_string(),
            version: "2.0.0".to_string(),
        },
        property_descriptors: vec![],
        relationships: relationships
            .iter()
            .map(|name| RelationshipDescriptor {
                name: name.to_string(),
                description: None,
            })
            .collect(),
        supports_dynamic_properties: false,
        supports_dynamic_relationships: false,
    }
}

fn live_system() -> InMemoryFlowApi {
    let api = InMemoryFlowApi::new();
    api.register_processor_type(schema(GENERATE, &["success", "failure"]));
    api.register_processor_type(schema(LOG, &["success"]));
    api
}

fn deployer(api: &InMemoryFlowApi) -> StandardDeployFlowUseCase {
    StandardDeployFlowUseCase::new(
        Arc::new(api.clone()),
        Arc::new(api.clone()),
        DeploySettings {
            retry_attempts: 3,
            retry_delay: Duration::ZERO,
            poll_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(1),
            controller_services: BTreeMap::new(),
            purge_root: true,
            root_services: vec![],
        },
    )
}

const ROOT_LEVEL: &str = r#"
process_group:
  name: NiFi Flow
  processors:
    - id: gen
      name: gen
      type: org.apache.nifi.processors.standard.GenerateFlowFile
    - id: log
      name: log
      type: org.apache.nifi.processors.standard.LogAttribute
  connections:
    - source: gen
      destination: log
"#;

fn layout_settings() -> LayoutCheckSettings {
    LayoutCheckSettings {
        min_dx: 50.0,
        vertical_tolerance: 15.0,
        min_separation: 40.0,
    }
}

#[tokio::test]
async fn test_deploy_then_validate_is_ok() {
    let api = live_system();
    let spec = FlowParser::parse_yaml(PIPELINE).expect("pipeline parses");

    deployer(&api)
        .deploy(&spec, &BTreeMap::new())
        .await
        .expect("deploy succeeds");

    let report = TopologyValidator::new(Arc::new(api.clone()))
        .validate(&spec)
        .await
        .unwrap();
    assert!(report.ok, "unexpected issues: {:?}", report.issues);
    assert!(report.issues.is_empty());

    let layout = LayoutValidator::new(Arc::new(api), layout_settings())
        .validate()
        .await
        .unwrap();
    assert!(layout.is_clean(), "layout report: {:?}", layout);
}

#[tokio::test]
async fn test_connection_removed_out_of_band_is_reported_once() {
    let api = live_system();
    let spec = FlowParser::parse_yaml(PIPELINE).unwrap();
    deployer(&api).deploy(&spec, &BTreeMap::new()).await.unwrap();

    let connection = api
        .connections()
        .into_iter()
        .find(|c| c.name == "gen-to-log")
        .expect("gen-to-log deployed");
    assert!(api.remove_connection_out_of_band(&connection.id));

    let report = TopologyValidator::new(Arc::new(api)).validate(&spec).await.unwrap();
    assert!(!report.ok);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].error, "connection-missing");
    assert_eq!(report.issues[0].path, "NiFi Flow/Pipeline");
}

#[tokio::test]
async fn test_empty_group_is_flagged() {
    let api = live_system();
    let spec = FlowParser::parse_yaml(
        r#"
process_group:
  name: NiFi Flow
  process_groups:
    - name: Placeholder
"#,
    )
    .unwrap();
    deployer(&api).deploy(&spec, &BTreeMap::new()).await.unwrap();

    let report = TopologyValidator::new(Arc::new(api)).validate(&spec).await.unwrap();
    assert_eq!(report.count("empty-process-group"), 1);
    assert_eq!(report.issues.len(), 1);
}

#[tokio::test]
async fn test_generate_and_log_example() {
    let api = live_system();
    let spec = FlowParser::parse_yaml(PIPELINE).unwrap();

    // Auto-termination covers the unconnected relationship only
    let provider: Arc<dyn TypeMetadataProvider> = Arc::new(api.clone());
    let resolver = CachingMetadataResolver::new(provider);
    let prepared = prepare_flow(&spec, &resolver).await.unwrap();
    let pipeline = &prepared.children[0];
    let gen = pipeline.processors.iter().find(|p| p.spec.key == "gen").unwrap();
    assert_eq!(gen.auto_terminate, vec!["failure".to_string()]);

    // log sits one lane to the right of gen
    let placed = layout::apply(&spec);
    let group = &placed.root.child_groups[0];
    let gen_at = group.processors[0].position.unwrap();
    let log_at = group.processors[1].position.unwrap();
    assert_eq!(log_at.x - gen_at.x, LANE_WIDTH);
    assert_eq!(log_at.y, gen_at.y);

    deployer(&api).deploy(&spec, &BTreeMap::new()).await.unwrap();
    let report = TopologyValidator::new(Arc::new(api)).validate(&spec).await.unwrap();
    assert!(report.ok);
}

#[tokio::test]
async fn test_chain_deploys_strictly_left_to_right() {
    let api = live_system();
    let spec = FlowParser::parse_yaml(
        r#"
process_group:
  name: NiFi Flow
  process_groups:
    - name: Chain
      processors:
        - { id: a, name: A, type: org.apache.nifi.processors.standard.LogAttribute }
        - { id: b, name: B, type: org.apache.nifi.processors.standard.LogAttribute }
        - { id: c, name: C, type: org.apache.nifi.processors.standard.LogAttribute }
      connections:
        - { source: a, destination: b }
        - { source: b, destination: c }
"#,
    )
    .unwrap();

    deployer(&api).deploy(&spec, &BTreeMap::new()).await.unwrap();

    let x_of = |name: &str| {
        api.processors()
            .into_iter()
            .find(|p| p.name == name)
            .map(|p| p.position.x)
            .unwrap()
    };
    assert!(x_of("A") < x_of("B"));
    assert!(x_of("B") < x_of("C"));

    let layout = LayoutValidator::new(Arc::new(api), layout_settings())
        .validate()
        .await
        .unwrap();
    assert!(layout.left_to_right_violations.is_empty());
}

#[tokio::test]
async fn test_redeploy_does_not_duplicate_root_components() {
    let api = live_system();
    let spec = FlowParser::parse_yaml(ROOT_LEVEL).unwrap();
    let deployer = deployer(&api);

    deployer.deploy(&spec, &BTreeMap::new()).await.unwrap();
    assert_eq!(api.processors().len(), 2);
    assert_eq!(api.connections().len(), 1);

    deployer.deploy(&spec, &BTreeMap::new()).await.unwrap();
    assert_eq!(api.processors().len(), 2);
    assert_eq!(api.connections().len(), 1);
    assert_eq!(api.group_count(), 1);

    let layout = LayoutValidator::new(Arc::new(api), layout_settings())
        .validate()
        .await
        .unwrap();
    assert!(layout.is_clean(), "layout report: {:?}", layout);
}

#[tokio::test]
async fn test_redeploy_of_nested_flow_keeps_topology_exact() {
    let api = live_system();
    let spec = FlowParser::parse_yaml(PIPELINE).unwrap();
    let deployer = deployer(&api);

    deployer.deploy(&spec, &BTreeMap::new()).await.unwrap();
    deployer.deploy(&spec, &BTreeMap::new()).await.unwrap();

    assert_eq!(api.group_count(), 2);
    let report = TopologyValidator::new(Arc::new(api)).validate(&spec).await.unwrap();
    assert!(report.ok, "unexpected issues: {:?}", report.issues);
}
