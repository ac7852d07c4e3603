// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Component type metadata as reported by the live system.
//!
//! A [`TypeSchema`] describes one processor or controller-service type: the bundle
//! that provides it, its property descriptors, its relationships and whether it
//! accepts dynamic properties or relationships.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::live_system::LiveSystemError;

/// NAR coordinates providing a component type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bundle {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl std::fmt::Display for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowableValue {
    pub value: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Canonical property key
    pub name: String,
    pub display_name: String,
    pub required: bool,
    pub default_value: Option<String>,
    pub sensitive: bool,
    pub allowable_values: Vec<AllowableValue>,
    /// Controller service API type this property references, if any
    pub identifies_controller_service: Option<String>,
    pub identifies_controller_service_bundle: Option<Bundle>,
}

impl PropertyDescriptor {
    pub fn is_service_reference(&self) -> bool {
        self.identifies_controller_service.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSchema {
    pub component_type: String,
    pub bundle: Bundle,
    pub property_descriptors: Vec<PropertyDescriptor>,
    pub relationships: Vec<RelationshipDescriptor>,
    pub supports_dynamic_properties: bool,
    pub supports_dynamic_relationships: bool,
}

impl TypeSchema {
    pub fn descriptor(&self, key: &str) -> Option<&PropertyDescriptor> {
        self.property_descriptors.iter().find(|d| d.name == key)
    }

    /// Canonical spelling of a relationship, matched case-insensitively.
    pub fn canonical_relationship(&self, name: &str) -> Option<&str> {
        self.relationships
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .map(|r| r.name.as_str())
    }

    pub fn required_property_count(&self) -> usize {
        self.property_descriptors.iter().filter(|d| d.required).count()
    }
}

/// One implementation of a controller service API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceImplementation {
    pub service_type: String,
    pub bundle: Bundle,
}

/// Source of live type metadata.
#[async_trait]
pub trait TypeMetadataProvider: Send + Sync {
    async fn processor_schema(&self, processor_type: &str) -> Result<TypeSchema, LiveSystemError>;

    /// Implementations of a controller service API type, in a stable order
    async fn service_implementations(
        &self,
        api_type: &str,
        api_bundle: Option<&Bundle>,
    ) -> Result<Vec<ServiceImplementation>, LiveSystemError>;

    async fn service_schema(
        &self,
        service_type: &str,
        bundle: &Bundle,
    ) -> Result<TypeSchema, LiveSystemError>;
}

/// Trailing segment of a fully qualified class name.
pub fn simple_class_name(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}
