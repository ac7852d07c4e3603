// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Connected-relationship usage and auto-termination.
//!
//! A relationship that is declared by a processor type but has no outgoing
//! connection must be auto-terminated, otherwise NiFi refuses to start the
//! processor. Authors can force termination or keep a relationship open through
//! [`AutoTerminateOverride`].

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::flow::{
    AutoTerminateOverride, ConnectableKind, EndpointLookup, ProcessGroupSpec, SpecError,
    SpecErrorKind,
};
use crate::domain::metadata::TypeSchema;

/// Canonical spelling of `name`, or the literal name for dynamic-relationship types.
pub fn canonical_relationship(
    schema: &TypeSchema,
    name: &str,
    path: &str,
) -> Result<String, SpecError> {
    if let Some(canonical) = schema.canonical_relationship(name) {
        return Ok(canonical.to_string());
    }
    if schema.supports_dynamic_relationships {
        return Ok(name.to_string());
    }
    Err(SpecError::new(
        path,
        SpecErrorKind::UnknownRelationship {
            component_type: schema.component_type.clone(),
            relationship: name.to_string(),
        },
    ))
}

/// Relationships used by the group's connections, keyed by source processor key.
///
/// `schemas` maps processor keys of this group to their type schema. Names are
/// returned in their canonical spelling.
pub fn connected_relationships(
    group: &ProcessGroupSpec,
    schemas: &BTreeMap<String, &TypeSchema>,
    group_path: &str,
) -> Result<BTreeMap<String, BTreeSet<String>>, SpecError> {
    let mut connected: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for conn in &group.connections {
        let source_key = match group.resolve_endpoint(&conn.source) {
            EndpointLookup::Found(e) if e.kind == ConnectableKind::Processor && e.child_group.is_none() => {
                e.key
            }
            _ => continue,
        };
        let Some(schema) = schemas.get(source_key) else {
            continue;
        };
        let conn_path = format!("{}/connections[{}]", group_path, conn.name);
        let used = connected.entry(source_key.to_string()).or_default();
        for rel in &conn.relationships {
            used.insert(canonical_relationship(schema, rel, &conn_path)?);
        }
    }

    Ok(connected)
}

/// Auto-terminate set: explicit terminations plus every declared relationship that
/// is neither connected nor retained. Sorted and disjoint from `connected`.
pub fn compute_auto_terminate(
    schema: &TypeSchema,
    connected: &BTreeSet<String>,
    overrides: Option<&AutoTerminateOverride>,
    path: &str,
) -> Result<Vec<String>, SpecError> {
    let mut terminated = BTreeSet::new();
    let mut retained = BTreeSet::new();

    if let Some(overrides) = overrides {
        for name in &overrides.retain {
            retained.insert(canonical_relationship(schema, name, path)?);
        }
        for name in &overrides.terminate {
            let canonical = canonical_relationship(schema, name, path)?;
            if connected.contains(&canonical) {
                return Err(SpecError::new(
                    path,
                    SpecErrorKind::AutoTerminateConnected(canonical),
                ));
            }
            terminated.insert(canonical);
        }
    }

    for rel in &schema.relationships {
        if !connected.contains(&rel.name) && !retained.contains(&rel.name) {
            terminated.insert(rel.name.clone());
        }
    }

    Ok(terminated.into_iter().collect())
}
