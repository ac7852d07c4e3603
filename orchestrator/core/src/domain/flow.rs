// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Flow Specification Domain Model
//!
//! Declarative description of a NiFi canvas: a tree of process groups, each owning
//! processors, ports, wiring and nested child groups.
//!
//! # Architectural Context
//!
//! - **Bounded Context:** Flow Deployment Context
//! - **Aggregate Root:** FlowSpec
//!
//! # Invariants
//!
//! - The root group is named [`ROOT_GROUP_NAME`]; it maps onto the live root group
//!   instead of being created.
//! - Processor and port keys are unique within their group, child group names are
//!   unique among siblings.
//! - Connection endpoints resolve to a component of the same group or to a port of an
//!   immediate child group, in a direction NiFi accepts.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Sentinel name of the root group (the live canvas root).
pub const ROOT_GROUP_NAME: &str = "NiFi Flow";

/// Relationship assumed when a processor-sourced connection names none.
pub const DEFAULT_RELATIONSHIP: &str = "success";

// ============================================================================
// Value Objects
// ============================================================================

/// Canvas coordinates of a component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.0}, {:.0})", self.x, self.y)
    }
}

/// NiFi connectable type of a connection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectableKind {
    Processor,
    InputPort,
    OutputPort,
    Funnel,
}

impl ConnectableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectableKind::Processor => "PROCESSOR",
            ConnectableKind::InputPort => "INPUT_PORT",
            ConnectableKind::OutputPort => "OUTPUT_PORT",
            ConnectableKind::Funnel => "FUNNEL",
        }
    }

    /// Parse a NiFi connectable type; remote ports map onto local port kinds.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PROCESSOR" => Some(ConnectableKind::Processor),
            "INPUT_PORT" | "REMOTE_INPUT_PORT" => Some(ConnectableKind::InputPort),
            "OUTPUT_PORT" | "REMOTE_OUTPUT_PORT" => Some(ConnectableKind::OutputPort),
            "FUNNEL" => Some(ConnectableKind::Funnel),
            _ => None,
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Scheduling overrides applied to a processor at creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent_tasks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_duration_millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yield_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulletin_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorSpec {
    /// Local key, unique within the owning group
    pub key: String,
    pub name: String,
    /// Fully qualified processor class name
    pub processor_type: String,
    pub position: Option<Position>,
    /// Raw property mapping as authored (keys may be aliases)
    pub properties: BTreeMap<String, String>,
    pub scheduling: Option<SchedulingSpec>,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortSpec {
    pub key: String,
    pub name: String,
    pub position: Option<Position>,
    pub allow_remote_access: bool,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSpec {
    pub name: String,
    /// Source reference: a local key, or `child/key` for a child group port
    pub source: String,
    pub destination: String,
    pub relationships: Vec<String>,
}

/// Per-processor auto-terminate override.
///
/// `terminate` is always auto-terminated; `retain` keeps an unconnected relationship
/// open instead of inferring auto-termination for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoTerminateOverride {
    #[serde(default)]
    pub terminate: Vec<String>,
    #[serde(default)]
    pub retain: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessGroupSpec {
    pub name: String,
    pub position: Option<Position>,
    pub comments: Option<String>,
    pub processors: Vec<ProcessorSpec>,
    pub connections: Vec<ConnectionSpec>,
    pub input_ports: Vec<PortSpec>,
    pub output_ports: Vec<PortSpec>,
    pub child_groups: Vec<ProcessGroupSpec>,
    /// processor key -> override
    pub auto_terminate: BTreeMap<String, AutoTerminateOverride>,
}

/// A resolved connection endpoint within a group's scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Endpoint<'a> {
    /// Key of the component inside its own group
    pub key: &'a str,
    pub name: &'a str,
    pub kind: ConnectableKind,
    /// Name of the immediate child group owning the port, if any
    pub child_group: Option<&'a str>,
}

impl Endpoint<'_> {
    /// Whether NiFi accepts this endpoint as a connection source from the group scope.
    pub fn can_be_source(&self) -> bool {
        match (self.kind, self.child_group) {
            (ConnectableKind::Processor, None) => true,
            (ConnectableKind::InputPort, None) => true,
            (ConnectableKind::OutputPort, Some(_)) => true,
            _ => false,
        }
    }

    pub fn can_be_destination(&self) -> bool {
        match (self.kind, self.child_group) {
            (ConnectableKind::Processor, None) => true,
            (ConnectableKind::OutputPort, None) => true,
            (ConnectableKind::InputPort, Some(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndpointLookup<'a> {
    Found(Endpoint<'a>),
    Missing,
    Ambiguous(Vec<String>),
}

impl ProcessGroupSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn processor(&self, key: &str) -> Option<&ProcessorSpec> {
        self.processors.iter().find(|p| p.key == key)
    }

    pub fn child(&self, name: &str) -> Option<&ProcessGroupSpec> {
        self.child_groups.iter().find(|c| c.name == name)
    }

    /// A group with no processors, no ports and no children.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
            && self.input_ports.is_empty()
            && self.output_ports.is_empty()
            && self.child_groups.is_empty()
    }

    fn own_endpoint(&self, key: &str) -> Option<Endpoint<'_>> {
        if let Some(p) = self.processor(key) {
            return Some(Endpoint {
                key: &p.key,
                name: &p.name,
                kind: ConnectableKind::Processor,
                child_group: None,
            });
        }
        if let Some(p) = self.input_ports.iter().find(|p| p.key == key) {
            return Some(port_endpoint(p, ConnectableKind::InputPort, None));
        }
        self.output_ports
            .iter()
            .find(|p| p.key == key)
            .map(|p| port_endpoint(p, ConnectableKind::OutputPort, None))
    }

    fn child_port_endpoints<'a>(&'a self, child: &'a ProcessGroupSpec, key: &str) -> Vec<Endpoint<'a>> {
        let inputs = child
            .input_ports
            .iter()
            .filter(|p| p.key == key)
            .map(|p| port_endpoint(p, ConnectableKind::InputPort, Some(&child.name)));
        let outputs = child
            .output_ports
            .iter()
            .filter(|p| p.key == key)
            .map(|p| port_endpoint(p, ConnectableKind::OutputPort, Some(&child.name)));
        inputs.chain(outputs).collect()
    }

    /// Resolve a connection reference against this group's scope.
    ///
    /// Lookup order: own processors and ports, then `child/key` qualified child ports,
    /// then a unique unqualified port key among immediate children.
    pub fn resolve_endpoint(&self, reference: &str) -> EndpointLookup<'_> {
        if let Some(endpoint) = self.own_endpoint(reference) {
            return EndpointLookup::Found(endpoint);
        }

        if let Some((child_name, key)) = reference.split_once('/') {
            if let Some(child) = self.child(child_name) {
                let mut found = self.child_port_endpoints(child, key);
                return match found.len() {
                    0 => EndpointLookup::Missing,
                    1 => EndpointLookup::Found(found.remove(0)),
                    _ => EndpointLookup::Ambiguous(
                        found.iter().map(|e| format!("{}/{}", child_name, e.key)).collect(),
                    ),
                };
            }
        }

        let mut candidates: Vec<Endpoint<'_>> = self
            .child_groups
            .iter()
            .flat_map(|child| self.child_port_endpoints(child, reference))
            .collect();
        match candidates.len() {
            0 => EndpointLookup::Missing,
            1 => EndpointLookup::Found(candidates.remove(0)),
            _ => EndpointLookup::Ambiguous(
                candidates
                    .iter()
                    .map(|e| format!("{}/{}", e.child_group.unwrap_or_default(), e.key))
                    .collect(),
            ),
        }
    }

    /// Check the group's structural invariants, recursing into children.
    pub fn validate(&self, path: &str) -> Result<(), SpecError> {
        let mut keys = BTreeSet::new();
        for p in &self.processors {
            if !keys.insert(p.key.as_str()) {
                return Err(SpecError::new(
                    path,
                    SpecErrorKind::Duplicate { what: "component key", key: p.key.clone() },
                ));
            }
        }
        for p in self.input_ports.iter().chain(self.output_ports.iter()) {
            if !keys.insert(p.key.as_str()) {
                return Err(SpecError::new(
                    path,
                    SpecErrorKind::Duplicate { what: "component key", key: p.key.clone() },
                ));
            }
        }

        let mut child_names = BTreeSet::new();
        for child in &self.child_groups {
            if !child_names.insert(child.name.as_str()) {
                return Err(SpecError::new(
                    path,
                    SpecErrorKind::Duplicate { what: "process group", key: child.name.clone() },
                ));
            }
        }

        let mut connection_names = BTreeSet::new();
        for conn in &self.connections {
            let conn_path = format!("{}/connections[{}]", path, conn.name);
            if !connection_names.insert(conn.name.as_str()) {
                return Err(SpecError::new(
                    path,
                    SpecErrorKind::Duplicate { what: "connection", key: conn.name.clone() },
                ));
            }
            let source = self.require_endpoint(&conn_path, conn, &conn.source)?;
            if !source.can_be_source() {
                return Err(SpecError::new(
                    conn_path,
                    SpecErrorKind::InvalidEndpoint {
                        connection: conn.name.clone(),
                        key: conn.source.clone(),
                        role: "source",
                    },
                ));
            }
            let destination = self.require_endpoint(&conn_path, conn, &conn.destination)?;
            if !destination.can_be_destination() {
                return Err(SpecError::new(
                    conn_path,
                    SpecErrorKind::InvalidEndpoint {
                        connection: conn.name.clone(),
                        key: conn.destination.clone(),
                        role: "destination",
                    },
                ));
            }
        }

        for key in self.auto_terminate.keys() {
            if self.processor(key).is_none() {
                return Err(SpecError::new(
                    format!("{}/auto_terminate", path),
                    SpecErrorKind::UnknownAutoTerminateProcessor(key.clone()),
                ));
            }
        }

        for child in &self.child_groups {
            child.validate(&format!("{}/{}", path, child.name))?;
        }
        Ok(())
    }

    fn require_endpoint<'a>(
        &'a self,
        conn_path: &str,
        conn: &ConnectionSpec,
        reference: &str,
    ) -> Result<Endpoint<'a>, SpecError> {
        match self.resolve_endpoint(reference) {
            EndpointLookup::Found(endpoint) => Ok(endpoint),
            EndpointLookup::Missing => Err(SpecError::new(
                conn_path,
                SpecErrorKind::DanglingReference {
                    connection: conn.name.clone(),
                    key: reference.to_string(),
                },
            )),
            EndpointLookup::Ambiguous(candidates) => Err(SpecError::new(
                conn_path,
                SpecErrorKind::AmbiguousReference {
                    connection: conn.name.clone(),
                    key: reference.to_string(),
                    candidates: candidates.join(", "),
                },
            )),
        }
    }

    fn collect_summary(&self, path: &str, summary: &mut FlowSummary) {
        summary.process_group_names.push(path.to_string());
        summary.processors += self.processors.len();
        summary.connections += self.connections.len();
        summary.input_ports += self.input_ports.len();
        summary.output_ports += self.output_ports.len();
        for child in &self.child_groups {
            child.collect_summary(&format!("{}/{}", path, child.name), summary);
        }
    }
}

fn port_endpoint<'a>(
    port: &'a PortSpec,
    kind: ConnectableKind,
    child_group: Option<&'a str>,
) -> Endpoint<'a> {
    Endpoint {
        key: &port.key,
        name: &port.name,
        kind,
        child_group,
    }
}

// ============================================================================
// Aggregate Root: FlowSpec
// ============================================================================

/// Parsed and validated flow specification.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSpec {
    pub root: ProcessGroupSpec,
    /// Root child group name -> column bucket (0 = ungrouped, n = n-th heading)
    pub root_child_columns: BTreeMap<String, usize>,
}

impl FlowSpec {
    /// Create a FlowSpec, enforcing the root sentinel and every tree invariant.
    pub fn new(
        root: ProcessGroupSpec,
        root_child_columns: BTreeMap<String, usize>,
    ) -> Result<Self, SpecError> {
        if root.name != ROOT_GROUP_NAME {
            return Err(SpecError::new(
                "process_group.name",
                SpecErrorKind::InvalidRootName {
                    expected: ROOT_GROUP_NAME.to_string(),
                    got: root.name.clone(),
                },
            ));
        }
        root.validate(&root.name)?;
        Ok(Self {
            root,
            root_child_columns,
        })
    }

    pub fn summary(&self) -> FlowSummary {
        let mut summary = FlowSummary {
            root_group: self.root.name.clone(),
            ..Default::default()
        };
        self.root.collect_summary(&self.root.name, &mut summary);
        summary
    }
}

/// Counts reported by dry runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowSummary {
    pub root_group: String,
    pub process_group_names: Vec<String>,
    pub processors: usize,
    pub connections: usize,
    pub input_ports: usize,
    pub output_ports: usize,
}

// ============================================================================
// Errors
// ============================================================================

/// A malformed or self-inconsistent specification. Always fatal, never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{path}: {kind}")]
pub struct SpecError {
    /// Location of the offending element, e.g. `NiFi Flow/Ingest/processors[gen]`
    pub path: String,
    pub kind: SpecErrorKind,
}

impl SpecError {
    pub fn new(path: impl Into<String>, kind: SpecErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpecErrorKind {
    #[error("failed to read specification: {0}")]
    Io(String),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("root process group must be named '{expected}', got '{got}'")]
    InvalidRootName { expected: String, got: String },

    #[error("invalid position {0}; expected [x, y] or {{x, y}}")]
    InvalidPosition(String),

    #[error("property '{0}' must be a scalar value")]
    InvalidPropertyValue(String),

    #[error("duplicate {what} '{key}'")]
    Duplicate { what: &'static str, key: String },

    #[error("connection '{connection}' references unknown component '{key}'")]
    DanglingReference { connection: String, key: String },

    #[error("connection '{connection}' reference '{key}' is ambiguous (candidates: {candidates})")]
    AmbiguousReference {
        connection: String,
        key: String,
        candidates: String,
    },

    #[error("connection '{connection}' cannot use '{key}' as its {role}")]
    InvalidEndpoint {
        connection: String,
        key: String,
        role: &'static str,
    },

    #[error("auto_terminate references unknown processor '{0}'")]
    UnknownAutoTerminateProcessor(String),

    #[error("type '{component_type}' does not define property '{property}'")]
    UnknownProperty {
        component_type: String,
        property: String,
    },

    #[error("property alias '{alias}' is ambiguous between {candidates}")]
    AmbiguousAlias { alias: String, candidates: String },

    #[error("property '{canonical}' supplied more than once (as '{first}' and '{second}')")]
    DuplicateProperty {
        canonical: String,
        first: String,
        second: String,
    },

    #[error("property '{property}' value '{value}' is invalid; expected one of: {choices}")]
    InvalidAllowableValue {
        property: String,
        value: String,
        choices: String,
    },

    #[error("missing required property '{0}'")]
    MissingRequiredProperty(String),

    #[error("relationship '{relationship}' is not defined by type '{component_type}'")]
    UnknownRelationship {
        component_type: String,
        relationship: String,
    },

    #[error("cannot auto-terminate relationship '{0}' because it is connected")]
    AutoTerminateConnected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(key: &str) -> ProcessorSpec {
        ProcessorSpec {
            key: key.to_string(),
            name: key.to_uppercase(),
            processor_type: "org.example.Proc".to_string(),
            position: None,
            properties: BTreeMap::new(),
            scheduling: None,
            comments: None,
        }
    }

    fn port(key: &str) -> PortSpec {
        PortSpec {
            key: key.to_string(),
            name: key.to_uppercase(),
            position: None,
            allow_remote_access: false,
            comments: None,
        }
    }

    fn connection(source: &str, destination: &str) -> ConnectionSpec {
        ConnectionSpec {
            name: format!("{}-to-{}", source, destination),
            source: source.to_string(),
            destination: destination.to_string(),
            relationships: vec![],
        }
    }

    #[test]
    fn test_rejects_wrong_root_name() {
        let result = FlowSpec::new(ProcessGroupSpec::new("Other"), BTreeMap::new());
        assert!(matches!(
            result,
            Err(SpecError { kind: SpecErrorKind::InvalidRootName { .. }, .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_component_keys_across_kinds() {
        let mut group = ProcessGroupSpec::new("G");
        group.processors.push(processor("a"));
        group.input_ports.push(port("a"));
        let err = group.validate("NiFi Flow/G").unwrap_err();
        assert_eq!(err.path, "NiFi Flow/G");
        assert!(matches!(err.kind, SpecErrorKind::Duplicate { .. }));
    }

    #[test]
    fn test_dangling_connection_reports_connection_path() {
        let mut group = ProcessGroupSpec::new("G");
        group.processors.push(processor("a"));
        group.connections.push(connection("a", "ghost"));
        let err = group.validate("G").unwrap_err();
        assert_eq!(err.path, "G/connections[a-to-ghost]");
        assert!(matches!(err.kind, SpecErrorKind::DanglingReference { .. }));
    }

    #[test]
    fn test_child_port_resolution_plain_and_qualified() {
        let mut child_a = ProcessGroupSpec::new("A");
        child_a.input_ports.push(port("in"));
        let mut child_b = ProcessGroupSpec::new("B");
        child_b.input_ports.push(port("in"));
        child_b.output_ports.push(port("done"));

        let mut parent = ProcessGroupSpec::new("P");
        parent.child_groups = vec![child_a, child_b];

        assert!(matches!(parent.resolve_endpoint("in"), EndpointLookup::Ambiguous(_)));
        match parent.resolve_endpoint("B/in") {
            EndpointLookup::Found(e) => {
                assert_eq!(e.child_group, Some("B"));
                assert_eq!(e.kind, ConnectableKind::InputPort);
            }
            other => panic!("unexpected lookup result: {:?}", other),
        }
        match parent.resolve_endpoint("done") {
            EndpointLookup::Found(e) => assert!(e.can_be_source()),
            other => panic!("unexpected lookup result: {:?}", other),
        }
    }

    #[test]
    fn test_port_direction_is_enforced() {
        let mut group = ProcessGroupSpec::new("G");
        group.processors.push(processor("p"));
        group.output_ports.push(port("out"));
        group.connections.push(connection("out", "p"));
        let err = group.validate("G").unwrap_err();
        assert!(matches!(
            err.kind,
            SpecErrorKind::InvalidEndpoint { role: "source", .. }
        ));
    }

    #[test]
    fn test_summary_counts_whole_tree() {
        let mut child = ProcessGroupSpec::new("Child");
        child.processors.push(processor("a"));
        child.processors.push(processor("b"));
        child.connections.push(connection("a", "b"));
        let mut root = ProcessGroupSpec::new(ROOT_GROUP_NAME);
        root.child_groups.push(child);

        let spec = FlowSpec::new(root, BTreeMap::new()).unwrap();
        let summary = spec.summary();
        assert_eq!(summary.processors, 2);
        assert_eq!(summary.connections, 1);
        assert_eq!(summary.process_group_names, vec!["NiFi Flow", "NiFi Flow/Child"]);
    }
}
