// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Controller-service requirements of prepared processors.
//!
//! A requirement is a required, service-identifying property the author left
//! unset. It is satisfied from the run's name -> id map or by provisioning a
//! placeholder service built from the cheapest viable implementation.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::metadata::{simple_class_name, Bundle, ServiceImplementation, TypeSchema};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRequirement {
    pub processor_key: String,
    pub processor_name: String,
    /// Canonical property key
    pub property: String,
    /// Controller service API type the property references
    pub api_type: String,
    pub api_bundle: Option<Bundle>,
}

impl ServiceRequirement {
    /// Look up the requirement in an explicit name -> id map: by property key,
    /// then API type, then the API's simple class name.
    pub fn resolve_from<'a>(&self, services: &'a BTreeMap<String, String>) -> Option<&'a str> {
        services
            .get(&self.property)
            .or_else(|| services.get(&self.api_type))
            .or_else(|| services.get(simple_class_name(&self.api_type)))
            .map(String::as_str)
    }

    pub fn placeholder_name(&self) -> String {
        format!("{}-{}-Stub", self.processor_name, self.property)
    }
}

/// Requirements for every required service property left unset.
pub fn service_requirements(
    processor_key: &str,
    processor_name: &str,
    schema: &TypeSchema,
    properties: &BTreeMap<String, String>,
) -> Vec<ServiceRequirement> {
    schema
        .property_descriptors
        .iter()
        .filter(|d| d.required)
        .filter_map(|d| {
            let api_type = d.identifies_controller_service.as_ref()?;
            let is_set = properties.get(&d.name).map(|v| !v.is_empty()).unwrap_or(false);
            if is_set {
                return None;
            }
            Some(ServiceRequirement {
                processor_key: processor_key.to_string(),
                processor_name: processor_name.to_string(),
                property: d.name.clone(),
                api_type: api_type.clone(),
                api_bundle: d.identifies_controller_service_bundle.clone(),
            })
        })
        .collect()
}

/// Replace service-reference values that name an entry of the map with its id.
pub fn substitute_service_ids(
    schema: &TypeSchema,
    properties: &mut BTreeMap<String, String>,
    services: &BTreeMap<String, String>,
) {
    for (key, value) in properties.iter_mut() {
        let is_reference = schema
            .descriptor(key)
            .map(|d| d.is_service_reference())
            .unwrap_or(false);
        if !is_reference {
            continue;
        }
        if let Some(id) = services.get(value.as_str()) {
            tracing::debug!("Mapped controller service '{}' for property '{}'", value, key);
            *value = id.clone();
        }
    }
}

/// An implementation chosen to stand in for a missing service.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderPlan {
    pub implementation: ServiceImplementation,
    pub properties: BTreeMap<String, String>,
}

/// Pick the viable implementation with the fewest required properties.
///
/// An implementation is not viable when it itself needs another controller service
/// without a default. Ties keep the listing order.
pub fn select_placeholder(
    candidates: &[(ServiceImplementation, TypeSchema)],
) -> Option<PlaceholderPlan> {
    candidates
        .iter()
        .filter(|(_, schema)| {
            !schema
                .property_descriptors
                .iter()
                .any(|d| d.required && d.is_service_reference() && d.default_value.is_none())
        })
        .min_by_key(|(_, schema)| schema.required_property_count())
        .map(|(implementation, schema)| PlaceholderPlan {
            implementation: implementation.clone(),
            properties: placeholder_properties(schema),
        })
}

/// Required properties filled with default, first allowable value, or a stub marker.
pub fn placeholder_properties(schema: &TypeSchema) -> BTreeMap<String, String> {
    schema
        .property_descriptors
        .iter()
        .filter(|d| d.required)
        .map(|d| {
            let value = d
                .default_value
                .clone()
                .or_else(|| d.allowable_values.first().map(|a| a.value.clone()))
                .unwrap_or_else(|| format!("auto-stub-{}", d.name));
            (d.name.clone(), value)
        })
        .collect()
}
