// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Flow YAML Parser
//!
//! This module provides infrastructure for parsing flow specification YAML
//! into domain objects.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Translates YAML schema to domain model
//!
//! # Specification Format
//!
//! ```yaml
//! process_group:
//!   name: NiFi Flow
//!   processors:
//!     - id: gen
//!       type: org.apache.nifi.processors.standard.GenerateFlowFile
//!       properties:
//!         File Size: 1 KB
//!     - id: log
//!       type: org.apache.nifi.processors.standard.LogAttribute
//!   connections:
//!     - source: gen
//!       destination: log
//!   groups:
//!     - name: Ingest
//!       process_groups:
//!         - name: Fetch
//! ```

use crate::domain::flow::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// YAML Schema (External Representation)
// ============================================================================

/// External YAML representation of a flow specification
#[derive(Debug, Clone, Deserialize)]
pub struct FlowManifest {
    pub process_group: ProcessGroupYaml,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessGroupYaml {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub position: Option<serde_yaml::Value>,
    #[serde(default, alias = "description")]
    pub comments: Option<String>,
    #[serde(default)]
    pub processors: Vec<ProcessorYaml>,
    #[serde(default)]
    pub input_ports: Vec<PortYaml>,
    #[serde(default)]
    pub output_ports: Vec<PortYaml>,
    #[serde(default)]
    pub connections: Vec<ConnectionYaml>,
    #[serde(default)]
    pub auto_terminate: BTreeMap<String, AutoTerminateYaml>,
    /// Ungrouped children (column 0 at the root)
    #[serde(default)]
    pub process_groups: Vec<ProcessGroupYaml>,
    /// Headed buckets of children; heading i is column i at the root
    #[serde(default)]
    pub groups: Vec<GroupHeadingYaml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorYaml {
    #[serde(default, alias = "key")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub processor_type: Option<String>,
    #[serde(default)]
    pub position: Option<serde_yaml::Value>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub scheduling: Option<SchedulingSpec>,
    #[serde(default, alias = "description")]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortYaml {
    #[serde(default, alias = "key")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub position: Option<serde_yaml::Value>,
    #[serde(default, alias = "remote_access")]
    pub allow_remote_access: bool,
    #[serde(default, alias = "description")]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionYaml {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub relationships: Vec<String>,
}

/// `gen: [failure]` or `gen: {terminate: [failure], retain: [retry]}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AutoTerminateYaml {
    List(Vec<String>),
    Detailed(AutoTerminateOverride),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupHeadingYaml {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub process_groups: Vec<ProcessGroupYaml>,
}

// ============================================================================
// Parser
// ============================================================================

/// Flow specification parser (Infrastructure service)
pub struct FlowParser;

impl FlowParser {
    /// Parse a flow specification from a YAML file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<FlowSpec, SpecError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            SpecError::new(
                path.as_ref().display().to_string(),
                SpecErrorKind::Io(e.to_string()),
            )
        })?;

        Self::parse_yaml(&content)
    }

    /// Parse a flow specification from a YAML string
    pub fn parse_yaml(yaml: &str) -> Result<FlowSpec, SpecError> {
        let manifest: FlowManifest = serde_yaml::from_str(yaml)
            .map_err(|e| SpecError::new("process_group", SpecErrorKind::Yaml(e.to_string())))?;

        Self::validate_and_convert(manifest)
    }

    fn validate_and_convert(manifest: FlowManifest) -> Result<FlowSpec, SpecError> {
        let root_name = manifest
            .process_group
            .name
            .clone()
            .ok_or_else(|| SpecError::new("process_group", SpecErrorKind::MissingField("name")))?;
        if root_name != ROOT_GROUP_NAME {
            return Err(SpecError::new(
                "process_group.name",
                SpecErrorKind::InvalidRootName {
                    expected: ROOT_GROUP_NAME.to_string(),
                    got: root_name,
                },
            ));
        }

        let mut columns = BTreeMap::new();
        let root = Self::convert_group(manifest.process_group, ROOT_GROUP_NAME, Some(&mut columns))?;
        FlowSpec::new(root, columns)
    }

    fn convert_group(
        yaml: ProcessGroupYaml,
        path: &str,
        mut columns: Option<&mut BTreeMap<String, usize>>,
    ) -> Result<ProcessGroupSpec, SpecError> {
        let name = yaml
            .name
            .ok_or_else(|| SpecError::new(path, SpecErrorKind::MissingField("name")))?;
        let position = yaml
            .position
            .as_ref()
            .map(|v| Self::convert_position(v, path))
            .transpose()?;

        let processors = yaml
            .processors
            .into_iter()
            .enumerate()
            .map(|(i, p)| Self::convert_processor(p, &format!("{}/processors[{}]", path, i)))
            .collect::<Result<Vec<_>, _>>()?;
        let input_ports = yaml
            .input_ports
            .into_iter()
            .enumerate()
            .map(|(i, p)| Self::convert_port(p, &format!("{}/input_ports[{}]", path, i)))
            .collect::<Result<Vec<_>, _>>()?;
        let output_ports = yaml
            .output_ports
            .into_iter()
            .enumerate()
            .map(|(i, p)| Self::convert_port(p, &format!("{}/output_ports[{}]", path, i)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut connections = Vec::with_capacity(yaml.connections.len());
        for (i, conn) in yaml.connections.into_iter().enumerate() {
            let conn_path = format!("{}/connections[{}]", path, i);
            let source = conn
                .source
                .ok_or_else(|| SpecError::new(&conn_path, SpecErrorKind::MissingField("source")))?;
            let destination = conn.destination.ok_or_else(|| {
                SpecError::new(&conn_path, SpecErrorKind::MissingField("destination"))
            })?;
            let mut relationships = conn.relationships;
            if relationships.is_empty() && processors.iter().any(|p| p.key == source) {
                relationships.push(DEFAULT_RELATIONSHIP.to_string());
            }
            connections.push(ConnectionSpec {
                name: conn
                    .name
                    .unwrap_or_else(|| format!("{}-to-{}", source, destination)),
                source,
                destination,
                relationships,
            });
        }

        let auto_terminate = yaml
            .auto_terminate
            .into_iter()
            .map(|(key, value)| {
                let overrides = match value {
                    AutoTerminateYaml::List(terminate) => AutoTerminateOverride {
                        terminate,
                        retain: vec![],
                    },
                    AutoTerminateYaml::Detailed(overrides) => overrides,
                };
                (key, overrides)
            })
            .collect();

        let mut child_groups = Vec::new();
        let headed = yaml
            .groups
            .into_iter()
            .enumerate()
            .flat_map(|(i, heading)| heading.process_groups.into_iter().map(move |g| (i + 1, g)));
        let legacy = yaml.process_groups.into_iter().map(|g| (0, g));
        for (column, child) in legacy.chain(headed) {
            let child_name = child.name.clone().unwrap_or_default();
            let child_path = format!("{}/{}", path, child_name);
            child_groups.push(Self::convert_group(child, &child_path, None)?);
            if let Some(columns) = columns.as_deref_mut() {
                columns.insert(child_name, column);
            }
        }

        Ok(ProcessGroupSpec {
            name,
            position,
            comments: yaml.comments,
            processors,
            connections,
            input_ports,
            output_ports,
            child_groups,
            auto_terminate,
        })
    }

    fn convert_processor(yaml: ProcessorYaml, path: &str) -> Result<ProcessorSpec, SpecError> {
        let key = yaml
            .id
            .ok_or_else(|| SpecError::new(path, SpecErrorKind::MissingField("id")))?;
        let processor_type = yaml
            .processor_type
            .ok_or_else(|| SpecError::new(path, SpecErrorKind::MissingField("type")))?;
        let position = yaml
            .position
            .as_ref()
            .map(|v| Self::convert_position(v, path))
            .transpose()?;

        let mut properties = BTreeMap::new();
        for (property, value) in yaml.properties {
            let value = Self::stringify(&value).ok_or_else(|| {
                SpecError::new(path, SpecErrorKind::InvalidPropertyValue(property.clone()))
            })?;
            properties.insert(property, value);
        }

        Ok(ProcessorSpec {
            name: yaml.name.unwrap_or_else(|| key.clone()),
            key,
            processor_type,
            position,
            properties,
            scheduling: yaml.scheduling,
            comments: yaml.comments,
        })
    }

    fn convert_port(yaml: PortYaml, path: &str) -> Result<PortSpec, SpecError> {
        let key = yaml
            .id
            .or_else(|| yaml.name.clone())
            .ok_or_else(|| SpecError::new(path, SpecErrorKind::MissingField("id")))?;
        let position = yaml
            .position
            .as_ref()
            .map(|v| Self::convert_position(v, path))
            .transpose()?;

        Ok(PortSpec {
            name: yaml.name.unwrap_or_else(|| key.clone()),
            key,
            position,
            allow_remote_access: yaml.allow_remote_access,
            comments: yaml.comments,
        })
    }

    fn convert_position(value: &serde_yaml::Value, path: &str) -> Result<Position, SpecError> {
        let invalid = || {
            let rendered = serde_yaml::to_string(value)
                .map(|s| s.trim().replace('\n', " "))
                .unwrap_or_default();
            SpecError::new(path, SpecErrorKind::InvalidPosition(rendered))
        };

        match value {
            serde_yaml::Value::Sequence(items) if items.len() == 2 => {
                let x = items[0].as_f64().ok_or_else(invalid)?;
                let y = items[1].as_f64().ok_or_else(invalid)?;
                Ok(Position::new(x, y))
            }
            serde_yaml::Value::Mapping(map) => {
                let x = map.get("x").and_then(|v| v.as_f64()).ok_or_else(invalid)?;
                let y = map.get("y").and_then(|v| v.as_f64()).ok_or_else(invalid)?;
                Ok(Position::new(x, y))
            }
            _ => Err(invalid()),
        }
    }

    /// Scalar YAML values as the strings NiFi expects.
    fn stringify(value: &serde_yaml::Value) -> Option<String> {
        match value {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            serde_yaml::Value::Null => Some(String::new()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEN_LOG: &str = r#"
process_group:
  name: NiFi Flow
  processors:
    - id: gen
      name: Generate
      type: org.apache.nifi.processors.standard.GenerateFlowFile
      position: [0, 0]
      properties:
        File Size: 1 KB
        Batch Size: 2
    - id: log
      type: org.apache.nifi.processors.standard.LogAttribute
  connections:
    - source: gen
      destination: log
"#;

    #[test]
    fn test_parse_simple_flow() {
        let spec = FlowParser::parse_yaml(GEN_LOG).unwrap();
        assert_eq!(spec.root.name, ROOT_GROUP_NAME);
        assert_eq!(spec.root.processors.len(), 2);

        let gen = &spec.root.processors[0];
        assert_eq!(gen.name, "Generate");
        assert_eq!(gen.position, Some(Position::new(0.0, 0.0)));
        assert_eq!(gen.properties["Batch Size"], "2");
        assert_eq!(spec.root.processors[1].name, "log");

        let conn = &spec.root.connections[0];
        assert_eq!(conn.name, "gen-to-log");
        assert_eq!(conn.relationships, vec!["success".to_string()]);
    }

    #[test]
    fn test_invalid_root_name() {
        let yaml = r#"
process_group:
  name: Flow
"#;
        assert!(matches!(
            FlowParser::parse_yaml(yaml),
            Err(SpecError { kind: SpecErrorKind::InvalidRootName { .. }, .. })
        ));
    }

    #[test]
    fn test_missing_type_names_processor_path() {
        let yaml = r#"
process_group:
  name: NiFi Flow
  process_groups:
    - name: Child
      processors:
        - id: a
          type: org.example.A
        - id: b
          type: org.example.B
        - id: c
"#;
        let err = FlowParser::parse_yaml(yaml).unwrap_err();
        assert_eq!(err.path, "NiFi Flow/Child/processors[2]");
        assert_eq!(err.kind, SpecErrorKind::MissingField("type"));
    }

    #[test]
    fn test_invalid_position() {
        let yaml = r#"
process_group:
  name: NiFi Flow
  processors:
    - id: a
      type: org.example.A
      position: [1, 2, 3]
"#;
        let err = FlowParser::parse_yaml(yaml).unwrap_err();
        assert!(matches!(err.kind, SpecErrorKind::InvalidPosition(_)));
    }

    #[test]
    fn test_dangling_reference() {
        let yaml = r#"
process_group:
  name: NiFi Flow
  processors:
    - id: a
      type: org.example.A
  connections:
    - source: a
      destination: nowhere
"#;
        let err = FlowParser::parse_yaml(yaml).unwrap_err();
        assert!(matches!(err.kind, SpecErrorKind::DanglingReference { .. }));
    }

    #[test]
    fn test_port_sourced_connection_keeps_empty_relationships() {
        let yaml = r#"
process_group:
  name: NiFi Flow
  process_groups:
    - name: Child
      input_ports:
        - id: in
      processors:
        - id: work
          type: org.example.Work
      connections:
        - source: in
          destination: work
"#;
        let spec = FlowParser::parse_yaml(yaml).unwrap();
        let child = &spec.root.child_groups[0];
        assert!(child.connections[0].relationships.is_empty());
        assert_eq!(child.input_ports[0].name, "in");
    }

    #[test]
    fn test_groups_headings_assign_columns() {
        let yaml = r#"
process_group:
  name: NiFi Flow
  process_groups:
    - name: Legacy
  groups:
    - name: Ingest
      process_groups:
        - name: Fetch
        - name: Parse
    - name: Egress
      process_groups:
        - name: Publish
"#;
        let spec = FlowParser::parse_yaml(yaml).unwrap();
        let names: Vec<&str> = spec.root.child_groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Legacy", "Fetch", "Parse", "Publish"]);
        assert_eq!(spec.root_child_columns["Legacy"], 0);
        assert_eq!(spec.root_child_columns["Parse"], 1);
        assert_eq!(spec.root_child_columns["Publish"], 2);
    }

    #[test]
    fn test_child_names_unique_across_both_forms() {
        let yaml = r#"
process_group:
  name: NiFi Flow
  process_groups:
    - name: Fetch
  groups:
    - name: Ingest
      process_groups:
        - name: Fetch
"#;
        let err = FlowParser::parse_yaml(yaml).unwrap_err();
        assert!(matches!(err.kind, SpecErrorKind::Duplicate { what: "process group", .. }));
    }

    #[test]
    fn test_auto_terminate_forms() {
        let yaml = r#"
process_group:
  name: NiFi Flow
  processors:
    - id: gen
      type: org.example.Gen
    - id: split
      type: org.example.Split
  auto_terminate:
    gen: [failure]
    split:
      terminate: [original]
      retain: [retry]
"#;
        let spec = FlowParser::parse_yaml(yaml).unwrap();
        assert_eq!(spec.root.auto_terminate["gen"].terminate, vec!["failure".to_string()]);
        assert_eq!(spec.root.auto_terminate["split"].retain, vec!["retry".to_string()]);
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.yaml");
        std::fs::write(&path, GEN_LOG).unwrap();
        assert!(FlowParser::parse_file(&path).is_ok());

        let err = FlowParser::parse_file(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err.kind, SpecErrorKind::Io(_)));
    }
}
