// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment run state and outcome.
//!
//! Prepared groups and the live component map exist for a single run and are
//! dropped when it ends. The [`DeploymentOutcome`] is what callers keep.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::domain::flow::{ConnectionSpec, Endpoint, ProcessGroupSpec, ProcessorSpec, SpecError};
use crate::domain::live_system::{ConnectableRef, LiveSystemError};
use crate::domain::metadata::Bundle;
use crate::domain::services::ServiceRequirement;

/// Processor ready for creation: canonical properties, auto-terminate set and the
/// controller services it still needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedProcessor {
    pub spec: ProcessorSpec,
    pub bundle: Bundle,
    pub properties: BTreeMap<String, String>,
    pub auto_terminate: Vec<String>,
    pub service_requirements: Vec<ServiceRequirement>,
}

/// Connection with relationship names in their canonical spelling.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedConnection {
    pub spec: ConnectionSpec,
    pub relationships: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedGroup {
    /// Slash-separated path from the root, e.g. `NiFi Flow/Ingest`
    pub path: String,
    pub spec: ProcessGroupSpec,
    pub processors: Vec<PreparedProcessor>,
    pub connections: Vec<PreparedConnection>,
    pub children: Vec<PreparedGroup>,
}

/// Spec keys -> live connectables, filled while a group is created.
///
/// Child-group ports are registered under `child/key` so they never shadow the
/// group's own components.
#[derive(Debug, Clone, Default)]
pub struct LiveComponentMap {
    entries: HashMap<String, ConnectableRef>,
}

impl LiveComponentMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, connectable: ConnectableRef) {
        self.entries.insert(key.into(), connectable);
    }

    pub fn insert_child_port(&mut self, child: &str, key: &str, connectable: ConnectableRef) {
        self.entries.insert(format!("{}/{}", child, key), connectable);
    }

    pub fn lookup(&self, endpoint: &Endpoint<'_>) -> Option<&ConnectableRef> {
        match endpoint.child_group {
            Some(child) => self.entries.get(&format!("{}/{}", child, endpoint.key)),
            None => self.entries.get(endpoint.key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionedService {
    pub id: String,
    pub name: String,
    pub service_type: String,
    pub group_id: String,
    pub api_type: String,
}

/// Result of a deployment run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeploymentOutcome {
    pub root_group_id: String,
    /// Group path -> live id
    pub groups: BTreeMap<String, String>,
    pub provisioned_services: Vec<ProvisionedService>,
    pub processors: usize,
    pub connections: usize,
    pub input_ports: usize,
    pub output_ports: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid flow specification: {0}")]
    Spec(#[from] SpecError),

    #[error("live system error: {0}")]
    LiveSystem(#[from] LiveSystemError),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        source: LiveSystemError,
    },

    #[error("timed out after {waited:?} waiting for {what} (last observed: {last_observed})")]
    StabilizationTimeout {
        what: String,
        last_observed: String,
        waited: Duration,
    },

    #[error(
        "no viable implementation of {api_type} for property '{property}' of processor '{processor}'"
    )]
    UnresolvableServiceRequirement {
        processor: String,
        property: String,
        api_type: String,
    },

    #[error("drop request on connection {connection_id} failed: {reason}")]
    QueueDrainFailed { connection_id: String, reason: String },

    #[error("connection '{connection}' endpoint '{key}' was not created")]
    UnmappedEndpoint { connection: String, key: String },
}

impl DeployError {
    /// Spec errors and unresolvable requirements are never worth retrying.
    pub fn is_fatal_input(&self) -> bool {
        matches!(
            self,
            DeployError::Spec(_) | DeployError::UnresolvableServiceRequirement { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow::ConnectableKind;

    fn connectable(id: &str, kind: ConnectableKind) -> ConnectableRef {
        ConnectableRef {
            id: id.to_string(),
            group_id: "g".to_string(),
            kind,
            name: None,
        }
    }

    #[test]
    fn test_child_ports_do_not_shadow_own_components() {
        let mut map = LiveComponentMap::new();
        map.insert("in", connectable("own-in", ConnectableKind::InputPort));
        map.insert_child_port("Child", "in", connectable("child-in", ConnectableKind::InputPort));

        let own = Endpoint {
            key: "in",
            name: "IN",
            kind: ConnectableKind::InputPort,
            child_group: None,
        };
        let child = Endpoint { child_group: Some("Child"), ..own };
        assert_eq!(map.lookup(&own).unwrap().id, "own-in");
        assert_eq!(map.lookup(&child).unwrap().id, "child-in");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_retries_exhausted_reports_last_error() {
        let err = DeployError::RetriesExhausted {
            operation: "delete process group".to_string(),
            attempts: 5,
            source: LiveSystemError::Conflict("revision 3 is stale".to_string()),
        };
        let message = err.to_string();
        assert!(message.contains("5 attempts"));
        assert!(message.contains("revision 3 is stale"));
        assert!(!err.is_fatal_input());
    }
}
