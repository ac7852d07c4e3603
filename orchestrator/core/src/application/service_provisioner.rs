// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Controller Service Provisioner
//!
//! Satisfies the service requirements of prepared processors.
//!
//! Service-reference properties whose value names an entry of the run's map are
//! rewritten to that entry's id first.
//!
//! # Resolution Order
//!
//! 1. The explicit name -> id map supplied to the run
//! 2. A placeholder already provisioned during this run for the same API type and
//!    bundle, provided it lives in the target group or one of its ancestors
//! 3. A new placeholder built from the cheapest viable implementation
//!
//! Placeholders are created disabled; enabling them is left to the operator.

use std::collections::{BTreeMap, HashMap};

use crate::application::metadata_resolver::CachingMetadataResolver;
use crate::application::retry::{RetryPolicy, Retryable};
use crate::domain::deployment::{DeployError, PreparedProcessor, ProvisionedService};
use crate::domain::live_system::{FlowApi, NewControllerService};
use crate::domain::metadata::Bundle;
use crate::domain::services::{select_placeholder, substitute_service_ids, ServiceRequirement};

pub struct ServiceProvisioner<'a> {
    api: &'a dyn FlowApi,
    resolver: &'a CachingMetadataResolver,
    retry: RetryPolicy,
    explicit: &'a BTreeMap<String, String>,
    provisioned: HashMap<(String, Option<Bundle>), Vec<ProvisionedService>>,
}

impl<'a> ServiceProvisioner<'a> {
    pub fn new(
        api: &'a dyn FlowApi,
        resolver: &'a CachingMetadataResolver,
        retry: RetryPolicy,
        explicit: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            api,
            resolver,
            retry,
            explicit,
            provisioned: HashMap::new(),
        }
    }

    /// Fill every unresolved service property of `processor` with a service id.
    ///
    /// `scope` lists the target group id followed by its ancestors.
    pub async fn satisfy(
        &mut self,
        processor: &mut PreparedProcessor,
        scope: &[String],
    ) -> Result<(), DeployError> {
        if !self.explicit.is_empty() {
            let resolved = self.resolver.processor(&processor.spec.processor_type).await?;
            substitute_service_ids(&resolved.schema, &mut processor.properties, self.explicit);
        }

        let requirements = std::mem::take(&mut processor.service_requirements);
        for requirement in &requirements {
            let id = self.resolve(requirement, scope).await?;
            processor.properties.insert(requirement.property.clone(), id);
        }
        Ok(())
    }

    async fn resolve(
        &mut self,
        requirement: &ServiceRequirement,
        scope: &[String],
    ) -> Result<String, DeployError> {
        if let Some(id) = requirement.resolve_from(self.explicit) {
            tracing::debug!(
                "Using configured controller service {} for {}.{}",
                id,
                requirement.processor_name,
                requirement.property
            );
            return Ok(id.to_string());
        }

        let key = (requirement.api_type.clone(), requirement.api_bundle.clone());
        let reusable = self
            .provisioned
            .get(&key)
            .and_then(|services| services.iter().find(|s| scope.contains(&s.group_id)));
        if let Some(service) = reusable {
            return Ok(service.id.clone());
        }

        let group_id = scope.first().cloned().unwrap_or_default();
        let service = self.provision(requirement, &group_id).await?;
        let id = service.id.clone();
        self.provisioned.entry(key).or_default().push(service);
        Ok(id)
    }

    async fn provision(
        &self,
        requirement: &ServiceRequirement,
        group_id: &str,
    ) -> Result<ProvisionedService, DeployError> {
        let implementations = self
            .resolver
            .implementations(&requirement.api_type, requirement.api_bundle.as_ref())
            .await?;

        let mut candidates = Vec::with_capacity(implementations.len());
        for implementation in implementations {
            let resolved = self
                .resolver
                .service(&implementation.service_type, &implementation.bundle)
                .await?;
            candidates.push((implementation, resolved.schema.clone()));
        }

        let plan = select_placeholder(&candidates).ok_or_else(|| {
            DeployError::UnresolvableServiceRequirement {
                processor: requirement.processor_name.clone(),
                property: requirement.property.clone(),
                api_type: requirement.api_type.clone(),
            }
        })?;

        let request = NewControllerService {
            name: requirement.placeholder_name(),
            service_type: plan.implementation.service_type.clone(),
            bundle: Some(plan.implementation.bundle.clone()),
            properties: plan.properties,
        };
        let created = self
            .retry
            .run("create controller service", Retryable::NotFound, || {
                self.api.create_controller_service(group_id, &request)
            })
            .await?;

        tracing::info!(
            "Provisioned placeholder controller service '{}' ({}) for {}",
            created.name,
            created.service_type,
            requirement.api_type
        );
        Ok(ProvisionedService {
            id: created.id,
            name: created.name,
            service_type: created.service_type,
            group_id: group_id.to_string(),
            api_type: requirement.api_type.clone(),
        })
    }

    /// Every placeholder created during the run, ordered by name.
    pub fn into_provisioned(self) -> Vec<ProvisionedService> {
        let mut services: Vec<ProvisionedService> =
            self.provisioned.into_values().flatten().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }
}
