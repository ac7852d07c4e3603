// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Root Service Registry
//!
//! Keeps the shared controller services declared under `spec.deploy.root_services`
//! present on the canvas root and returns their `key -> id` map for the run.
//!
//! # Reconciliation
//!
//! 1. Find the service by configured id, then by name; create it when absent
//! 2. When a declared property differs from the live value: disable, wait for
//!    DISABLED, update with a fresh revision
//! 3. Move the service to its desired state (`auto_enable`) and wait for it
//!
//! Transitional states (ENABLING, DISABLING) are waited out before any change.

use std::collections::BTreeMap;

use crate::application::retry::{Poller, PollState, RetryPolicy, Retryable};
use crate::domain::deployer_config::RootServiceEntry;
use crate::domain::deployment::DeployError;
use crate::domain::live_system::{
    ControllerServiceState, FlowApi, LiveControllerService, LiveSystemError, NewControllerService,
};

pub struct RootServiceRegistry<'a> {
    api: &'a dyn FlowApi,
    retry: RetryPolicy,
    poller: Poller,
}

impl<'a> RootServiceRegistry<'a> {
    pub fn new(api: &'a dyn FlowApi, retry: RetryPolicy, poller: Poller) -> Self {
        Self { api, retry, poller }
    }

    /// Ensure every entry exists on `root_id` in its desired state.
    pub async fn ensure(
        &self,
        root_id: &str,
        entries: &[RootServiceEntry],
    ) -> Result<BTreeMap<String, String>, DeployError> {
        let mut ids = BTreeMap::new();
        if entries.is_empty() {
            return Ok(ids);
        }

        let existing: Vec<LiveControllerService> = self
            .api
            .list_controller_services(root_id)
            .await?
            .into_iter()
            .filter(|s| s.group_id == root_id)
            .collect();

        for entry in entries {
            let found = entry
                .id
                .as_ref()
                .and_then(|id| existing.iter().find(|s| &s.id == id))
                .or_else(|| existing.iter().find(|s| s.name == entry.name));

            let id = match found {
                Some(service) => {
                    tracing::debug!("Reusing root controller service '{}' ({})", service.name, service.id);
                    self.reconcile_properties(&service.id, entry).await?;
                    service.id.clone()
                }
                None => self.create(root_id, entry).await?,
            };
            self.settle(&id, entry).await?;
            ids.insert(entry.key.clone(), id);
        }

        tracing::info!("Ensured {} root controller service(s)", ids.len());
        Ok(ids)
    }

    async fn create(&self, root_id: &str, entry: &RootServiceEntry) -> Result<String, DeployError> {
        let request = NewControllerService {
            name: entry.name.clone(),
            service_type: entry.service_type.clone(),
            bundle: entry.bundle.clone(),
            properties: entry.properties.clone(),
        };
        let created = self
            .retry
            .run("create controller service", Retryable::NotFound, || {
                self.api.create_controller_service(root_id, &request)
            })
            .await?;
        tracing::info!(
            "Created root controller service '{}' ({}) as {}",
            created.name,
            created.service_type,
            created.id
        );
        Ok(created.id)
    }

    async fn reconcile_properties(&self, id: &str, entry: &RootServiceEntry) -> Result<(), DeployError> {
        let current = self.stable(id, &entry.name).await?;
        let drifted: Vec<&str> = entry
            .properties
            .iter()
            .filter(|(key, value)| current.properties.get(*key) != Some(*value))
            .map(|(key, _)| key.as_str())
            .collect();
        if drifted.is_empty() {
            return Ok(());
        }

        tracing::info!(
            "Updating root controller service '{}': {}",
            entry.name,
            drifted.join(", ")
        );
        if current.state == ControllerServiceState::Enabled {
            self.transition(id, &entry.name, ControllerServiceState::Disabled).await?;
        }
        self.retry
            .run("update controller service", Retryable::Conflict, || async {
                let fresh = self.api.get_controller_service(id).await?;
                self.api
                    .update_controller_service(id, &fresh.revision, &entry.properties)
                    .await
            })
            .await?;
        Ok(())
    }

    /// Move the service to ENABLED or DISABLED according to `auto_enable`.
    async fn settle(&self, id: &str, entry: &RootServiceEntry) -> Result<(), DeployError> {
        let desired = if entry.auto_enable {
            ControllerServiceState::Enabled
        } else {
            ControllerServiceState::Disabled
        };
        let current = self.stable(id, &entry.name).await?;
        if current.state != desired {
            self.transition(id, &entry.name, desired).await?;
        }
        Ok(())
    }

    async fn transition(
        &self,
        id: &str,
        name: &str,
        target: ControllerServiceState,
    ) -> Result<(), DeployError> {
        self.retry
            .run("set controller service state", Retryable::Conflict, || async {
                let fresh = self.api.get_controller_service(id).await?;
                self.api
                    .set_controller_service_state(id, &fresh.revision, target)
                    .await
            })
            .await?;

        self.poller
            .until(
                &format!("controller service '{}' to become {}", name, target.as_str()),
                || async {
                    let current = self.api.get_controller_service(id).await?;
                    Ok::<_, LiveSystemError>(if current.state == target {
                        PollState::Ready(())
                    } else {
                        PollState::Pending(current.state.as_str().to_string())
                    })
                },
            )
            .await
    }

    /// The service once it is neither ENABLING nor DISABLING.
    async fn stable(&self, id: &str, name: &str) -> Result<LiveControllerService, DeployError> {
        self.poller
            .until(&format!("controller service '{}' to settle", name), || async {
                let current = self.api.get_controller_service(id).await?;
                Ok::<_, LiveSystemError>(match current.state {
                    ControllerServiceState::Enabling | ControllerServiceState::Disabling => {
                        PollState::Pending(current.state.as_str().to_string())
                    }
                    _ => PollState::Ready(current),
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryFlowApi;
    use std::time::Duration;

    const READER: &str = "org.apache.nifi.json.JsonTreeReader";

    fn registry(api: &InMemoryFlowApi) -> RootServiceRegistry<'_> {
        RootServiceRegistry::new(
            api,
            RetryPolicy {
                attempts: 3,
                delay: Duration::ZERO,
            },
            Poller {
                timeout: Duration::from_millis(50),
                interval: Duration::from_millis(1),
            },
        )
    }

    fn entry(key: &str, name: &str, properties: &[(&str, &str)]) -> RootServiceEntry {
        RootServiceEntry {
            key: key.to_string(),
            name: name.to_string(),
            service_type: READER.to_string(),
            properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            auto_enable: true,
            bundle: None,
            id: None,
        }
    }

    async fn existing(api: &InMemoryFlowApi, name: &str, schema: &str, enabled: bool) -> String {
        let root = api.root_group_id().await.unwrap();
        let service = api
            .create_controller_service(
                &root,
                &NewControllerService {
                    name: name.to_string(),
                    service_type: READER.to_string(),
                    bundle: None,
                    properties: BTreeMap::from([("schema".to_string(), schema.to_string())]),
                },
            )
            .await
            .unwrap();
        if enabled {
            api.set_controller_service_state(&service.id, &service.revision, ControllerServiceState::Enabled)
                .await
                .unwrap();
        }
        service.id
    }

    #[tokio::test]
    async fn test_missing_service_is_created_and_enabled() {
        let api = InMemoryFlowApi::new();
        let root = api.root_group_id().await.unwrap();

        let ids = registry(&api)
            .ensure(&root, &[entry("json-reader", "Shared JSON Reader", &[("schema", "v1")])])
            .await
            .unwrap();

        let services = api.controller_services();
        assert_eq!(services.len(), 1);
        assert_eq!(ids["json-reader"], services[0].id);
        assert_eq!(services[0].group_id, root);
        assert_eq!(services[0].state, ControllerServiceState::Enabled);
        assert_eq!(services[0].properties["schema"], "v1");
    }

    #[tokio::test]
    async fn test_existing_service_is_reused_by_name() {
        let api = InMemoryFlowApi::new();
        let root = api.root_group_id().await.unwrap();
        let id = existing(&api, "Shared JSON Reader", "v1", true).await;

        let ids = registry(&api)
            .ensure(&root, &[entry("json-reader", "Shared JSON Reader", &[("schema", "v1")])])
            .await
            .unwrap();

        assert_eq!(ids["json-reader"], id);
        assert_eq!(api.controller_services().len(), 1);
        let journal = api.journal();
        assert!(!journal.iter().any(|e| e.starts_with("update_controller_service")));
        assert_eq!(
            journal
                .iter()
                .filter(|e| e.starts_with("create_controller_service"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_drifted_properties_disable_update_then_enable() {
        let api = InMemoryFlowApi::new();
        let root = api.root_group_id().await.unwrap();
        let id = existing(&api, "Shared JSON Reader", "v1", true).await;

        registry(&api)
            .ensure(&root, &[entry("json-reader", "Shared JSON Reader", &[("schema", "v2")])])
            .await
            .unwrap();

        let journal = api.journal();
        let index = |prefix: &str| journal.iter().rposition(|e| e.starts_with(prefix)).unwrap();
        let disabled = index("set_controller_service_state Shared JSON Reader DISABLED");
        let updated = index("update_controller_service Shared JSON Reader");
        let enabled = index("set_controller_service_state Shared JSON Reader ENABLED");
        assert!(disabled < updated);
        assert!(updated < enabled);

        let service = api.controller_services().into_iter().find(|s| s.id == id).unwrap();
        assert_eq!(service.properties["schema"], "v2");
        assert_eq!(service.state, ControllerServiceState::Enabled);
    }

    #[tokio::test]
    async fn test_configured_id_wins_and_auto_enable_false_disables() {
        let api = InMemoryFlowApi::new();
        let root = api.root_group_id().await.unwrap();
        let by_id = existing(&api, "Renamed Reader", "v1", true).await;
        existing(&api, "Shared JSON Reader", "v1", false).await;

        let mut declared = entry("json-reader", "Shared JSON Reader", &[]);
        declared.id = Some(by_id.clone());
        declared.auto_enable = false;
        let ids = registry(&api).ensure(&root, &[declared]).await.unwrap();

        assert_eq!(ids["json-reader"], by_id);
        let service = api.controller_services().into_iter().find(|s| s.id == by_id).unwrap();
        assert_eq!(service.state, ControllerServiceState::Disabled);
    }

    #[tokio::test]
    async fn test_no_entries_makes_no_calls() {
        let api = InMemoryFlowApi::new();
        let root = api.root_group_id().await.unwrap();
        let ids = registry(&api).ensure(&root, &[]).await.unwrap();
        assert!(ids.is_empty());
        assert!(api.journal().is_empty());
    }
}
