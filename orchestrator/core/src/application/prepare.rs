// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Preparation pass.
//!
//! Resolves metadata for every processor in the tree, normalizes properties,
//! canonicalizes connection relationships and computes auto-termination before
//! the deployer touches the live system. Any [`SpecError`](crate::domain::flow::SpecError)
//! surfaces here, so a bad spec never leaves a half-built canvas behind.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::application::metadata_resolver::{CachingMetadataResolver, ResolvedType};
use crate::domain::deployment::{DeployError, PreparedConnection, PreparedGroup, PreparedProcessor};
use crate::domain::flow::{ConnectableKind, EndpointLookup, FlowSpec, ProcessGroupSpec};
use crate::domain::metadata::TypeSchema;
use crate::domain::properties::normalize_properties;
use crate::domain::relationships::{
    canonical_relationship, compute_auto_terminate, connected_relationships,
};
use crate::domain::services::service_requirements;

/// Prepare the whole tree rooted at `spec.root`.
pub async fn prepare_flow(
    spec: &FlowSpec,
    resolver: &CachingMetadataResolver,
) -> Result<PreparedGroup, DeployError> {
    prepare_group(&spec.root, spec.root.name.clone(), resolver).await
}

type BoxedPrepare<'a> = Pin<Box<dyn Future<Output = Result<PreparedGroup, DeployError>> + Send + 'a>>;

fn prepare_group<'a>(
    group: &'a ProcessGroupSpec,
    path: String,
    resolver: &'a CachingMetadataResolver,
) -> BoxedPrepare<'a> {
    Box::pin(prepare_single(group, path, resolver))
}

async fn prepare_single(
    group: &ProcessGroupSpec,
    path: String,
    resolver: &CachingMetadataResolver,
) -> Result<PreparedGroup, DeployError> {
    let mut resolved: BTreeMap<String, Arc<ResolvedType>> = BTreeMap::new();
    for processor in &group.processors {
        resolved.insert(
            processor.key.clone(),
            resolver.processor(&processor.processor_type).await?,
        );
    }
    let schemas: BTreeMap<String, &TypeSchema> = resolved
        .iter()
        .map(|(key, r)| (key.clone(), &r.schema))
        .collect();

    let connected = connected_relationships(group, &schemas, &path)?;
    let empty = BTreeSet::new();

    let mut processors = Vec::with_capacity(group.processors.len());
    for processor in &group.processors {
        let Some(resolved) = resolved.get(&processor.key) else {
            continue;
        };
        let schema = &resolved.schema;
        let processor_path = format!("{}/processors[{}]", path, processor.key);

        let properties =
            normalize_properties(schema, &resolved.aliases, &processor.properties, &processor_path)?;

        let auto_terminate = compute_auto_terminate(
            schema,
            connected.get(&processor.key).unwrap_or(&empty),
            group.auto_terminate.get(&processor.key),
            &processor_path,
        )?;
        let requirements =
            service_requirements(&processor.key, &processor.name, schema, &properties);

        processors.push(PreparedProcessor {
            spec: processor.clone(),
            bundle: schema.bundle.clone(),
            properties,
            auto_terminate,
            service_requirements: requirements,
        });
    }

    let mut connections = Vec::with_capacity(group.connections.len());
    for connection in &group.connections {
        let source_schema = match group.resolve_endpoint(&connection.source) {
            EndpointLookup::Found(e)
                if e.kind == ConnectableKind::Processor && e.child_group.is_none() =>
            {
                schemas.get(e.key).copied()
            }
            _ => None,
        };
        let connection_path = format!("{}/connections[{}]", path, connection.name);
        let relationships = match source_schema {
            Some(schema) => connection
                .relationships
                .iter()
                .map(|r| canonical_relationship(schema, r, &connection_path))
                .collect::<Result<Vec<_>, _>>()?,
            None => connection.relationships.clone(),
        };
        connections.push(PreparedConnection {
            spec: connection.clone(),
            relationships,
        });
    }

    let mut children = Vec::with_capacity(group.child_groups.len());
    for child in &group.child_groups {
        let child_path = format!("{}/{}", path, child.name);
        children.push(prepare_group(child, child_path, resolver).await?);
    }

    Ok(PreparedGroup {
        path,
        spec: group.clone(),
        processors,
        connections,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow::{ConnectionSpec, ProcessorSpec, SpecErrorKind};
    use crate::domain::metadata::{
        Bundle, PropertyDescriptor, RelationshipDescriptor, TypeMetadataProvider,
    };
    use crate::infrastructure::in_memory::InMemoryFlowApi;

    fn schema(component_type: &str, relationships: &[&str]) -> TypeSchema {
        TypeSchema {
            component_type: component_type.to_string(),
            bundle: Bundle {
                group: "org.example".to_string(),
                artifact: "example-nar".to_string(),
                version: "1.0".to_string(),
            },
            property_descriptors: vec![PropertyDescriptor {
                name: "batch-size".to_string(),
                display_name: "Batch Size".to_string(),
                required: false,
                default_value: Some("1".to_string()),
                sensitive: false,
                allowable_values: vec![],
                identifies_controller_service: None,
                identifies_controller_service_bundle: None,
            }],
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

    fn processor(key: &str, processor_type: &str) -> ProcessorSpec {
        ProcessorSpec {
            key: key.to_string(),
            name: key.to_string(),
            processor_type: processor_type.to_string(),
            position: None,
            properties: BTreeMap::new(),
            scheduling: None,
            comments: None,
        }
    }

    fn resolver_with(api: InMemoryFlowApi) -> CachingMetadataResolver {
        let provider: Arc<dyn TypeMetadataProvider> = Arc::new(api);
        CachingMetadataResolver::new(provider)
    }

    #[tokio::test]
    async fn test_prepare_canonicalizes_relationships_and_terminates_the_rest() {
        let api = InMemoryFlowApi::new();
        api.register_processor_type(schema("org.example.Gen", &["success"]));
        api.register_processor_type(schema("org.example.Log", &["success", "failure"]));

        let mut root = ProcessGroupSpec::new("NiFi Flow");
        let mut gen = processor("gen", "org.example.Gen");
        gen.properties.insert("Batch Size".to_string(), " 10 ".to_string());
        root.processors = vec![gen, processor("log", "org.example.Log")];
        root.connections = vec![ConnectionSpec {
            name: "gen-to-log".to_string(),
            source: "gen".to_string(),
            destination: "log".to_string(),
            relationships: vec!["SUCCESS".to_string()],
        }];
        let spec = FlowSpec::new(root, BTreeMap::new()).unwrap();

        let prepared = prepare_flow(&spec, &resolver_with(api))
            .await
            .unwrap();

        let gen = &prepared.processors[0];
        assert_eq!(gen.properties.get("batch-size").map(String::as_str), Some("10"));
        assert!(gen.auto_terminate.is_empty());
        assert_eq!(prepared.processors[1].auto_terminate, vec!["failure", "success"]);
        assert_eq!(prepared.connections[0].relationships, vec!["success"]);
    }

    #[tokio::test]
    async fn test_spec_error_in_nested_group_carries_its_path() {
        let api = InMemoryFlowApi::new();
        api.register_processor_type(schema("org.example.Gen", &["success"]));

        let mut child = ProcessGroupSpec::new("Ingest");
        let mut gen = processor("gen", "org.example.Gen");
        gen.properties.insert("Unknown Knob".to_string(), "1".to_string());
        child.processors = vec![gen];
        let mut root = ProcessGroupSpec::new("NiFi Flow");
        root.child_groups = vec![child];
        let spec = FlowSpec::new(root, BTreeMap::new()).unwrap();

        let err = prepare_flow(&spec, &resolver_with(api))
            .await
            .unwrap_err();
        match err {
            DeployError::Spec(spec_err) => {
                assert_eq!(spec_err.path, "NiFi Flow/Ingest/processors[gen]");
                assert!(matches!(spec_err.kind, SpecErrorKind::UnknownProperty { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
