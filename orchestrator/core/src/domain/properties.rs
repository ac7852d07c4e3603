// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Property key aliasing and value normalization.
//!
//! Authors may write a property by its canonical key, its display name, or a slug
//! (lower-cased alphanumerics of either). The [`AliasTable`] is built once per type
//! schema and maps every alias back to the canonical key.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::flow::{SpecError, SpecErrorKind};
use crate::domain::metadata::TypeSchema;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasResolution<'a> {
    Canonical(&'a str),
    Ambiguous(Vec<&'a str>),
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    canonical: BTreeSet<String>,
    display: HashMap<String, BTreeSet<String>>,
    slugs: HashMap<String, BTreeSet<String>>,
}

impl AliasTable {
    pub fn build(schema: &TypeSchema) -> Self {
        let mut table = Self::default();
        for descriptor in &schema.property_descriptors {
            table.canonical.insert(descriptor.name.clone());
            table
                .display
                .entry(descriptor.display_name.clone())
                .or_default()
                .insert(descriptor.name.clone());
            for alias in [&descriptor.name, &descriptor.display_name] {
                table
                    .slugs
                    .entry(slugify(alias))
                    .or_default()
                    .insert(descriptor.name.clone());
            }
        }
        table
    }

    /// Canonical key, then display name, then slug. A display name or slug
    /// shared by several descriptors is ambiguous.
    pub fn resolve(&self, key: &str) -> AliasResolution<'_> {
        if let Some(canonical) = self.canonical.get(key) {
            return AliasResolution::Canonical(canonical);
        }
        if let Some(targets) = self.display.get(key) {
            return from_targets(targets);
        }
        match self.slugs.get(&slugify(key)) {
            Some(targets) => from_targets(targets),
            None => AliasResolution::Unknown,
        }
    }
}

fn from_targets(targets: &BTreeSet<String>) -> AliasResolution<'_> {
    match targets.len() {
        0 => AliasResolution::Unknown,
        1 => targets
            .iter()
            .next()
            .map(|c| AliasResolution::Canonical(c.as_str()))
            .unwrap_or(AliasResolution::Unknown),
        _ => AliasResolution::Ambiguous(targets.iter().map(String::as_str).collect()),
    }
}

pub fn slugify(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Rewrite an authored property mapping to canonical keys and values.
///
/// Unresolvable keys are kept verbatim only when the type accepts dynamic
/// properties. Required properties without a value or default fail, except
/// controller-service references, which are reported as service requirements.
/// Applying the function to its own output yields the same mapping.
pub fn normalize_properties(
    schema: &TypeSchema,
    aliases: &AliasTable,
    raw: &BTreeMap<String, String>,
    path: &str,
) -> Result<BTreeMap<String, String>, SpecError> {
    let mut normalized = BTreeMap::new();
    let mut origin: HashMap<String, &str> = HashMap::new();

    for (raw_key, raw_value) in raw {
        let canonical = match aliases.resolve(raw_key) {
            AliasResolution::Canonical(key) => key.to_string(),
            AliasResolution::Ambiguous(candidates) => {
                return Err(SpecError::new(
                    path,
                    SpecErrorKind::AmbiguousAlias {
                        alias: raw_key.clone(),
                        candidates: candidates.join(", "),
                    },
                ));
            }
            AliasResolution::Unknown if schema.supports_dynamic_properties => raw_key.clone(),
            AliasResolution::Unknown => {
                return Err(SpecError::new(
                    path,
                    SpecErrorKind::UnknownProperty {
                        component_type: schema.component_type.clone(),
                        property: raw_key.clone(),
                    },
                ));
            }
        };

        if let Some(first) = origin.insert(canonical.clone(), raw_key.as_str()) {
            return Err(SpecError::new(
                path,
                SpecErrorKind::DuplicateProperty {
                    canonical,
                    first: first.to_string(),
                    second: raw_key.clone(),
                },
            ));
        }

        let mut value = raw_value.trim().to_string();
        if let Some(descriptor) = schema.descriptor(&canonical) {
            // An empty value clears the property and is never checked
            if !value.is_empty() && !descriptor.allowable_values.is_empty() {
                let matched = descriptor
                    .allowable_values
                    .iter()
                    .find(|allowed| allowed.value == value || allowed.display_name == value);
                match matched {
                    Some(allowed) => value = allowed.value.clone(),
                    None => {
                        return Err(SpecError::new(
                            path,
                            SpecErrorKind::InvalidAllowableValue {
                                property: canonical,
                                value,
                                choices: descriptor
                                    .allowable_values
                                    .iter()
                                    .map(|a| a.value.as_str())
                                    .collect::<Vec<_>>()
                                    .join(", "),
                            },
                        ));
                    }
                }
            }
        }
        normalized.insert(canonical, value);
    }

    for descriptor in schema.property_descriptors.iter().filter(|d| d.required) {
        let has_value = normalized
            .get(&descriptor.name)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        if !has_value && descriptor.default_value.is_none() && !descriptor.is_service_reference() {
            return Err(SpecError::new(
                path,
                SpecErrorKind::MissingRequiredProperty(descriptor.name.clone()),
            ));
        }
    }

    Ok(normalized)
}
