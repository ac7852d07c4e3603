// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deploy Flow Use Case
//!
//! Application service that materializes a [`FlowSpec`] on the live system.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Orchestrate preparation, teardown and creation
//! - **Collaborators:**
//!   - Domain: FlowSpec, layout engine, property and relationship resolution
//!   - Infrastructure: any `FlowApi` + `TypeMetadataProvider` (NiFi REST, in-memory)
//!
//! # Flow
//!
//! 1. Fill missing positions via the layout engine
//! 2. Prepare the whole tree (metadata, properties, auto-terminate, service needs)
//! 3. Purge the canvas root unless `purge_root` is off
//! 4. Ensure the configured root controller services; their keys join the
//!    service map
//! 5. Per group: input ports, output ports, services, processors, child groups,
//!    then connections
//! 6. A child group whose name already exists under the parent is torn down and
//!    replaced; the new child is polled until it can be queried
//!
//! With `purge_root` off, root-level components are appended to the existing
//! canvas and only child groups are replaced.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::application::metadata_resolver::CachingMetadataResolver;
use crate::application::prepare::prepare_flow;
use crate::application::retry::{Poller, PollState, RetryPolicy, Retryable};
use crate::application::root_services::RootServiceRegistry;
use crate::application::service_provisioner::ServiceProvisioner;
use crate::application::teardown::GroupTeardown;
use crate::domain::deployer_config::DeploySettings;
use crate::domain::deployment::{DeployError, DeploymentOutcome, LiveComponentMap, PreparedGroup};
use crate::domain::flow::{
    ConnectableKind, Endpoint, EndpointLookup, FlowSpec, FlowSummary, Position, ProcessGroupSpec,
};
use crate::domain::layout;
use crate::domain::live_system::{
    ConnectableRef, FlowApi, LiveSystemError, NewConnection, NewPort, NewProcessGroup, NewProcessor,
};
use crate::domain::metadata::TypeMetadataProvider;

/// Deploy Flow Use Case
#[async_trait]
pub trait DeployFlowUseCase: Send + Sync {
    /// Create every group, component and connection of `spec`.
    ///
    /// `controller_services` maps property keys, API types or simple class names
    /// to existing service ids and takes precedence over provisioning. It also
    /// overrides the configured map and the root service keys.
    ///
    /// # Errors
    ///
    /// - `DeployError::Spec`: raised during preparation, before any mutation
    /// - `DeployError::RetriesExhausted` / `StabilizationTimeout`: live system
    ///   never settled
    /// - `DeployError::UnresolvableServiceRequirement`: no usable placeholder
    async fn deploy(
        &self,
        spec: &FlowSpec,
        controller_services: &BTreeMap<String, String>,
    ) -> Result<DeploymentOutcome, DeployError>;

    /// Lay out and summarize without touching the live system.
    fn dry_run(&self, spec: &FlowSpec) -> FlowSummary {
        layout::apply(spec).summary()
    }
}

pub struct StandardDeployFlowUseCase {
    api: Arc<dyn FlowApi>,
    metadata: Arc<dyn TypeMetadataProvider>,
    settings: DeploySettings,
}

impl StandardDeployFlowUseCase {
    pub fn new(
        api: Arc<dyn FlowApi>,
        metadata: Arc<dyn TypeMetadataProvider>,
        settings: DeploySettings,
    ) -> Self {
        Self {
            api,
            metadata,
            settings,
        }
    }
}

#[async_trait]
impl DeployFlowUseCase for StandardDeployFlowUseCase {
    async fn deploy(
        &self,
        spec: &FlowSpec,
        controller_services: &BTreeMap<String, String>,
    ) -> Result<DeploymentOutcome, DeployError> {
        let placed = layout::apply(spec);

        let resolver = CachingMetadataResolver::new(self.metadata.clone());
        let prepared = prepare_flow(&placed, &resolver).await?;
        tracing::info!(
            "Prepared flow '{}' ({} processor types)",
            prepared.path,
            resolver.cached_processor_types()
        );

        let retry = RetryPolicy::from_settings(&self.settings);
        let api = self.api.as_ref();
        let root_id = retry
            .run("resolve root process group", Retryable::NotFound, || api.root_group_id())
            .await?;
        let poller = Poller::from_settings(&self.settings);

        if self.settings.purge_root {
            GroupTeardown::new(api, retry, poller).purge(&root_id).await?;
        }

        // Root service keys < configured map < services given to the call
        let mut services = RootServiceRegistry::new(api, retry, poller)
            .ensure(&root_id, &self.settings.root_services)
            .await?;
        services.extend(self.settings.controller_services.clone());
        services.extend(controller_services.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut run = DeploymentRun {
            api,
            retry,
            poller,
            provisioner: ServiceProvisioner::new(api, &resolver, retry, &services),
            outcome: DeploymentOutcome {
                root_group_id: root_id.clone(),
                ..Default::default()
            },
        };
        run.outcome.groups.insert(prepared.path.clone(), root_id.clone());
        run.deploy_group(prepared, &root_id, vec![root_id.clone()]).await?;

        let DeploymentRun {
            provisioner,
            mut outcome,
            ..
        } = run;
        outcome.provisioned_services = provisioner.into_provisioned();
        tracing::info!(
            "Deployed {} groups, {} processors, {} connections",
            outcome.groups.len(),
            outcome.processors,
            outcome.connections
        );
        Ok(outcome)
    }
}

type BoxedDeploy<'r> =
    Pin<Box<dyn Future<Output = Result<LiveComponentMap, DeployError>> + Send + 'r>>;

/// State owned by one deployment run.
struct DeploymentRun<'a> {
    api: &'a dyn FlowApi,
    retry: RetryPolicy,
    poller: Poller,
    provisioner: ServiceProvisioner<'a>,
    outcome: DeploymentOutcome,
}

impl<'a> DeploymentRun<'a> {
    fn deploy_group<'r>(
        &'r mut self,
        group: PreparedGroup,
        group_id: &'r str,
        scope: Vec<String>,
    ) -> BoxedDeploy<'r> {
        Box::pin(self.build_group(group, group_id, scope))
    }

    /// Build `group` inside the live group `group_id` and return its component map.
    ///
    /// `scope` is `group_id` followed by its ancestors.
    async fn build_group(
        &mut self,
        group: PreparedGroup,
        group_id: &str,
        scope: Vec<String>,
    ) -> Result<LiveComponentMap, DeployError> {
        let api = self.api;
        let mut components = LiveComponentMap::new();

        for (ports, kind) in [
            (&group.spec.input_ports, ConnectableKind::InputPort),
            (&group.spec.output_ports, ConnectableKind::OutputPort),
        ] {
            for port in ports {
                let request = NewPort {
                    name: port.name.clone(),
                    kind,
                    position: port.position.unwrap_or(Position::new(0.0, 0.0)),
                    allow_remote_access: port.allow_remote_access,
                    comments: port.comments.clone(),
                };
                let created = self
                    .retry
                    .run("create port", Retryable::NotFound, || {
                        api.create_port(group_id, &request)
                    })
                    .await?;
                tracing::info!("Created {} '{}' in {}", kind.as_str(), created.name, group.path);
                components.insert(
                    port.key.clone(),
                    ConnectableRef {
                        id: created.id,
                        group_id: group_id.to_string(),
                        kind,
                        name: Some(created.name),
                    },
                );
                match kind {
                    ConnectableKind::InputPort => self.outcome.input_ports += 1,
                    _ => self.outcome.output_ports += 1,
                }
            }
        }

        let mut processors = group.processors;
        for processor in processors.iter_mut() {
            self.provisioner.satisfy(processor, &scope).await?;
        }

        for processor in processors {
            let request = NewProcessor {
                name: processor.spec.name.clone(),
                processor_type: processor.spec.processor_type.clone(),
                bundle: processor.bundle,
                position: processor.spec.position.unwrap_or(Position::new(0.0, 0.0)),
                properties: processor.properties,
                scheduling: processor.spec.scheduling.clone().unwrap_or_default(),
                auto_terminated_relationships: processor.auto_terminate,
                comments: processor.spec.comments.clone(),
            };
            let created = self
                .retry
                .run("create processor", Retryable::NotFound, || {
                    api.create_processor(group_id, &request)
                })
                .await?;
            tracing::info!(
                "Created processor '{}' ({}) in {}",
                created.name,
                created.processor_type,
                group.path
            );
            components.insert(
                processor.spec.key.clone(),
                ConnectableRef {
                    id: created.id,
                    group_id: group_id.to_string(),
                    kind: ConnectableKind::Processor,
                    name: Some(created.name),
                },
            );
            self.outcome.processors += 1;
        }

        for child in group.children {
            let child_name = child.spec.name.clone();
            let child_path = child.path.clone();
            let port_specs: Vec<(String, String, ConnectableKind)> = child
                .spec
                .input_ports
                .iter()
                .map(|p| (p.key.clone(), p.name.clone(), ConnectableKind::InputPort))
                .chain(
                    child
                        .spec
                        .output_ports
                        .iter()
                        .map(|p| (p.key.clone(), p.name.clone(), ConnectableKind::OutputPort)),
                )
                .collect();

            let child_id = self.replace_child(&child, group_id).await?;
            self.outcome.groups.insert(child_path, child_id.clone());

            let mut child_scope = Vec::with_capacity(scope.len() + 1);
            child_scope.push(child_id.clone());
            child_scope.extend(scope.iter().cloned());
            let child_components = self.deploy_group(child, &child_id, child_scope).await?;

            for (key, name, kind) in &port_specs {
                let endpoint = Endpoint {
                    key,
                    name,
                    kind: *kind,
                    child_group: None,
                };
                if let Some(port) = child_components.lookup(&endpoint) {
                    components.insert_child_port(&child_name, key, port.clone());
                }
            }
        }

        for connection in &group.connections {
            let spec = &connection.spec;
            let source = resolve_live(&group.spec, &components, &spec.name, &spec.source)?;
            let destination = resolve_live(&group.spec, &components, &spec.name, &spec.destination)?;
            let request = NewConnection {
                name: spec.name.clone(),
                source,
                destination,
                relationships: connection.relationships.clone(),
            };
            self.retry
                .run("create connection", Retryable::NotFound, || {
                    api.create_connection(group_id, &request)
                })
                .await?;
            tracing::info!("Created connection '{}' in {}", spec.name, group.path);
            self.outcome.connections += 1;
        }

        Ok(components)
    }

    /// Tear down any same-named child, create the new one and wait until it is
    /// queryable.
    async fn replace_child(
        &self,
        child: &PreparedGroup,
        parent_id: &str,
    ) -> Result<String, DeployError> {
        let api = self.api;
        let parent = self
            .retry
            .run("read parent group", Retryable::NotFound, || api.group_flow(parent_id))
            .await?;
        if let Some(existing) = parent.child_named(&child.spec.name) {
            GroupTeardown::new(api, self.retry, self.poller)
                .remove(parent_id, &existing.id, &existing.name)
                .await?;
        }

        let request = NewProcessGroup {
            name: child.spec.name.clone(),
            position: child.spec.position.unwrap_or(Position::new(0.0, 0.0)),
            comments: child.spec.comments.clone(),
        };
        let created = self
            .retry
            .run("create process group", Retryable::NotFound, || {
                api.create_process_group(parent_id, &request)
            })
            .await?;
        tracing::info!("Created process group '{}' ({})", child.path, created.id);

        self.poller
            .until(&format!("process group '{}' to become queryable", child.path), || async {
                match api.group_flow(&created.id).await {
                    Ok(_) => Ok(PollState::Ready(())),
                    Err(LiveSystemError::NotFound(_)) => Ok(PollState::Pending("not found".to_string())),
                    Err(err) => Err(err),
                }
            })
            .await?;
        Ok(created.id)
    }
}

fn resolve_live(
    group: &ProcessGroupSpec,
    components: &LiveComponentMap,
    connection: &str,
    reference: &str,
) -> Result<ConnectableRef, DeployError> {
    let unmapped = || DeployError::UnmappedEndpoint {
        connection: connection.to_string(),
        key: reference.to_string(),
    };
    match group.resolve_endpoint(reference) {
        EndpointLookup::Found(endpoint) => components.lookup(&endpoint).cloned().ok_or_else(unmapped),
        _ => Err(unmapped()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metadata::{Bundle, RelationshipDescriptor, TypeSchema};
    use crate::infrastructure::flow_parser::FlowParser;
    use crate::infrastructure::in_memory::InMemoryFlowApi;
    use std::time::Duration;

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

    fn settings() -> DeploySettings {
        DeploySettings {
            retry_attempts: 3,
            retry_delay: Duration::ZERO,
            poll_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(1),
            controller_services: BTreeMap::new(),
            purge_root: true,
            root_services: vec![],
        }
    }

    fn use_case_with(api: &InMemoryFlowApi, settings: DeploySettings) -> StandardDeployFlowUseCase {
        StandardDeployFlowUseCase::new(Arc::new(api.clone()), Arc::new(api.clone()), settings)
    }

    fn use_case(api: &InMemoryFlowApi) -> StandardDeployFlowUseCase {
        use_case_with(api, settings())
    }

    const CHILD_FLOW: &str = r#"
process_group:
  name: NiFi Flow
  process_groups:
    - name: Ingest
      input_ports:
        - id: in
          name: IN
      processors:
        - id: log
          name: log
          type: org.apache.nifi.processors.standard.LogAttribute
      connections:
        - source: in
          destination: log
  processors:
    - id: gen
      name: gen
      type: org.apache.nifi.processors.standard.GenerateFlowFile
  connections:
    - source: gen
      destination: Ingest/in
"#;

    fn registered_api() -> InMemoryFlowApi {
        let api = InMemoryFlowApi::new();
        api.register_processor_type(schema(
            "org.apache.nifi.processors.standard.GenerateFlowFile",
            &["success"],
        ));
        api.register_processor_type(schema(
            "org.apache.nifi.processors.standard.LogAttribute",
            &["success"],
        ));
        api
    }

    #[tokio::test]
    async fn test_deploy_wires_parent_processor_into_child_port() {
        let api = registered_api();
        let spec = FlowParser::parse_yaml(CHILD_FLOW).unwrap();

        let outcome = use_case(&api).deploy(&spec, &BTreeMap::new()).await.unwrap();

        assert_eq!(outcome.processors, 2);
        assert_eq!(outcome.connections, 2);
        assert_eq!(outcome.input_ports, 1);
        assert!(outcome.groups.contains_key("NiFi Flow/Ingest"));

        let into_child = api
            .connections()
            .into_iter()
            .find(|c| c.name == "gen-to-Ingest/in")
            .unwrap();
        assert_eq!(into_child.destination.kind, ConnectableKind::InputPort);
        assert_eq!(into_child.destination.group_id, outcome.groups["NiFi Flow/Ingest"]);
    }

    #[tokio::test]
    async fn test_redeploy_replaces_running_child_group() {
        let api = registered_api();
        let spec = FlowParser::parse_yaml(CHILD_FLOW).unwrap();
        let deployer = use_case(&api);

        let first = deployer.deploy(&spec, &BTreeMap::new()).await.unwrap();
        let first_child = first.groups["NiFi Flow/Ingest"].clone();
        for processor in api.processors() {
            if processor.group_id == first_child {
                api.set_processor_state(&processor.id, "RUNNING");
            }
        }

        let second = deployer.deploy(&spec, &BTreeMap::new()).await.unwrap();
        assert_ne!(second.groups["NiFi Flow/Ingest"], first_child);
        // root + the single replaced child
        assert_eq!(api.group_count(), 2);
        assert_eq!(api.processors().len(), 2);
        assert_eq!(api.connections().len(), 2);
    }

    #[tokio::test]
    async fn test_without_purge_root_components_are_appended() {
        let api = registered_api();
        let spec = FlowParser::parse_yaml(CHILD_FLOW).unwrap();
        let deployer = use_case_with(
            &api,
            DeploySettings {
                purge_root: false,
                ..settings()
            },
        );

        deployer.deploy(&spec, &BTreeMap::new()).await.unwrap();
        deployer.deploy(&spec, &BTreeMap::new()).await.unwrap();

        // the child is replaced, the root's gen and its link are added again
        assert_eq!(api.group_count(), 2);
        let gens = api.processors().into_iter().filter(|p| p.name == "gen").count();
        assert_eq!(gens, 2);
        assert!(!api.journal().iter().any(|e| e.starts_with("delete_processor")));
    }

    #[tokio::test]
    async fn test_root_service_key_substitutes_into_properties() {
        let api = InMemoryFlowApi::new();
        let mut listen = schema("org.example.ListenHTTP", &["success"]);
        listen.property_descriptors = vec![crate::domain::metadata::PropertyDescriptor {
            name: "ssl-context".to_string(),
            display_name: "SSL Context Service".to_string(),
            required: true,
            default_value: None,
            sensitive: false,
            allowable_values: vec![],
            identifies_controller_service: Some("org.apache.nifi.ssl.SSLContextService".to_string()),
            identifies_controller_service_bundle: None,
        }];
        api.register_processor_type(listen);
        let spec = FlowParser::parse_yaml(
            r#"
process_group:
  name: NiFi Flow
  processors:
    - id: listen
      name: listen
      type: org.example.ListenHTTP
      properties:
        SSL Context Service: shared-ssl
"#,
        )
        .unwrap();
        let deployer = use_case_with(
            &api,
            DeploySettings {
                root_services: vec![crate::domain::deployer_config::RootServiceEntry {
                    key: "shared-ssl".to_string(),
                    name: "Shared SSL".to_string(),
                    service_type: "org.apache.nifi.ssl.StandardSSLContextService".to_string(),
                    properties: BTreeMap::new(),
                    auto_enable: true,
                    bundle: None,
                    id: None,
                }],
                ..settings()
            },
        );

        deployer.deploy(&spec, &BTreeMap::new()).await.unwrap();
        deployer.deploy(&spec, &BTreeMap::new()).await.unwrap();

        // purged with the root, then recreated once per run
        let services = api.controller_services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "Shared SSL");
        assert_eq!(api.processors().len(), 1);
        let journal = api.journal();
        let index = |prefix: &str| journal.iter().rposition(|e| e.starts_with(prefix)).unwrap();
        assert!(index("delete_controller_service Shared SSL") < index("create_controller_service Shared SSL"));
        assert!(index("create_controller_service Shared SSL") < index("create_processor listen"));
    }

    #[tokio::test]
    async fn test_spec_error_leaves_canvas_untouched() {
        let api = InMemoryFlowApi::new();
        api.register_processor_type(schema(
            "org.apache.nifi.processors.standard.GenerateFlowFile",
            &["success"],
        ));
        api.register_processor_type(schema(
            "org.apache.nifi.processors.standard.LogAttribute",
            &["success"],
        ));
        let yaml = CHILD_FLOW.replace(
            "    - source: gen\n      destination: Ingest/in\n",
            "    - source: gen\n      destination: Ingest/in\n      relationships: [bogus]\n",
        );
        let spec = FlowParser::parse_yaml(&yaml).unwrap();

        let err = use_case(&api).deploy(&spec, &BTreeMap::new()).await.unwrap_err();
        assert!(err.is_fatal_input());
        assert!(api.journal().is_empty());
    }

    #[tokio::test]
    async fn test_transient_not_found_on_create_is_retried() {
        let api = registered_api();
        api.fail_next(
            "create_processor",
            LiveSystemError::NotFound("group not visible yet".to_string()),
            2,
        );
        let spec = FlowParser::parse_yaml(CHILD_FLOW).unwrap();

        let outcome = use_case(&api).deploy(&spec, &BTreeMap::new()).await.unwrap();
        assert_eq!(outcome.processors, 2);
    }

    #[test]
    fn test_dry_run_summarizes_without_live_calls() {
        let api = registered_api();
        let spec = FlowParser::parse_yaml(CHILD_FLOW).unwrap();

        let summary = use_case(&api).dry_run(&spec);
        assert_eq!(summary.processors, 2);
        assert_eq!(summary.connections, 2);
        assert_eq!(summary.process_group_names, vec!["NiFi Flow", "NiFi Flow/Ingest"]);
        assert!(api.journal().is_empty());
    }
}
