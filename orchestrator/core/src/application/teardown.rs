// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process group teardown.
//!
//! NiFi only deletes a group that is stopped, has no enabled controller services
//! and holds no queued flowfiles. Teardown establishes each of those in turn,
//! waiting for the live system to confirm before moving on, then deletes with
//! the freshest revision.
//!
//! [`GroupTeardown::purge`] applies the same steps to a group that must survive,
//! such as the canvas root, removing its contents one component at a time.

use crate::application::live_walk::walk_subtree;
use crate::application::retry::{Poller, PollState, RetryPolicy, Retryable};
use crate::domain::deployment::DeployError;
use crate::domain::live_system::{
    ControllerServiceState, FlowApi, GroupFlow, LiveConnection, LiveSystemError, ScheduledState,
};

pub struct GroupTeardown<'a> {
    api: &'a dyn FlowApi,
    retry: RetryPolicy,
    poller: Poller,
}

impl<'a> GroupTeardown<'a> {
    pub fn new(api: &'a dyn FlowApi, retry: RetryPolicy, poller: Poller) -> Self {
        Self { api, retry, poller }
    }

    /// Stop, disable, drain and delete `group_id`, a child of `parent_id`.
    ///
    /// Connections in the parent that attach to the group's ports are drained
    /// and deleted first.
    pub async fn remove(&self, parent_id: &str, group_id: &str, name: &str) -> Result<(), DeployError> {
        tracing::info!("Tearing down existing process group '{}' ({})", name, group_id);
        self.stop(group_id, name).await?;
        self.disable_services(group_id).await?;
        self.drain_queues(group_id).await?;
        self.detach(parent_id, group_id).await?;

        self.retry
            .run("delete process group", Retryable::Conflict, || async {
                let current = self.api.get_process_group(group_id).await?;
                self.api.delete_process_group(group_id, &current.revision).await
            })
            .await?;
        tracing::info!("Deleted process group '{}'", name);
        Ok(())
    }

    /// Remove everything inside `group_id` but keep the group.
    ///
    /// Order: stop, drain and delete own connections, tear down child groups,
    /// delete processors and ports, then disable and delete owned services.
    /// Services go last so no processor still references them.
    pub async fn purge(&self, group_id: &str) -> Result<(), DeployError> {
        let flow = self.api.group_flow(group_id).await?;
        let services = self.api.list_controller_services(group_id).await?;
        if is_bare(&flow) && services.is_empty() {
            tracing::debug!("Process group {} is already empty", group_id);
            return Ok(());
        }

        let name = flow.group.name.clone();
        tracing::info!("Purging process group '{}' ({})", name, group_id);
        self.stop(group_id, &name).await?;

        for connection in &flow.connections {
            self.delete_connection(group_id, connection).await?;
        }
        for child in &flow.child_groups {
            self.remove(group_id, &child.id, &child.name).await?;
        }

        for processor in &flow.processors {
            self.retry
                .run("delete processor", Retryable::Conflict, || async {
                    let current = self.api.group_flow(group_id).await?;
                    let revision = current
                        .processors
                        .iter()
                        .find(|p| p.id == processor.id)
                        .map(|p| p.revision.clone())
                        .unwrap_or_else(|| processor.revision.clone());
                    self.api.delete_processor(&processor.id, &revision).await
                })
                .await?;
        }
        for port in flow.input_ports.iter().chain(flow.output_ports.iter()) {
            self.retry
                .run("delete port", Retryable::Conflict, || async {
                    let current = self.api.group_flow(group_id).await?;
                    let revision = current
                        .input_ports
                        .iter()
                        .chain(current.output_ports.iter())
                        .find(|p| p.id == port.id)
                        .map(|p| p.revision.clone())
                        .unwrap_or_else(|| port.revision.clone());
                    self.api.delete_port(&port.id, port.kind, &revision).await
                })
                .await?;
        }

        self.disable_services(group_id).await?;
        let owned = self.api.list_controller_services(group_id).await?;
        for service in owned.iter().filter(|s| s.group_id == group_id) {
            self.retry
                .run("delete controller service", Retryable::Conflict, || async {
                    let current = self.api.get_controller_service(&service.id).await?;
                    self.api
                        .delete_controller_service(&service.id, &current.revision)
                        .await
                })
                .await?;
        }

        tracing::info!(
            "Purged '{}': {} processors, {} ports, {} connections, {} child groups, {} services",
            name,
            flow.processors.len(),
            flow.input_ports.len() + flow.output_ports.len(),
            flow.connections.len(),
            flow.child_groups.len(),
            owned.iter().filter(|s| s.group_id == group_id).count()
        );
        Ok(())
    }

    async fn stop(&self, group_id: &str, name: &str) -> Result<(), DeployError> {
        self.retry
            .run("stop process group", Retryable::Conflict, || {
                self.api.schedule_process_group(group_id, ScheduledState::Stopped)
            })
            .await?;

        self.poller
            .until(&format!("processors of '{}' to stop", name), || async {
                let groups = walk_subtree(self.api, group_id).await?;
                let still_running: Vec<String> = groups
                    .iter()
                    .flat_map(|g| g.flow.processors.iter())
                    .filter(|p| p.state != "STOPPED" && p.state != "DISABLED")
                    .map(|p| format!("{} is {}", p.name, p.state))
                    .collect();
                Ok::<_, LiveSystemError>(if still_running.is_empty() {
                    PollState::Ready(())
                } else {
                    PollState::Pending(still_running.join(", "))
                })
            })
            .await
    }

    async fn disable_services(&self, group_id: &str) -> Result<(), DeployError> {
        let services = self.api.list_controller_services(group_id).await?;

        for service in services
            .iter()
            .filter(|s| s.state != ControllerServiceState::Disabled)
        {
            if service.state != ControllerServiceState::Disabling {
                self.retry
                    .run("disable controller service", Retryable::Conflict, || async {
                        let current = self.api.get_controller_service(&service.id).await?;
                        self.api
                            .set_controller_service_state(
                                &service.id,
                                &current.revision,
                                ControllerServiceState::Disabled,
                            )
                            .await
                    })
                    .await?;
            }

            self.poller
                .until(&format!("controller service '{}' to disable", service.name), || async {
                    let current = self.api.get_controller_service(&service.id).await?;
                    Ok::<_, LiveSystemError>(match current.state {
                        ControllerServiceState::Disabled => PollState::Ready(()),
                        other => PollState::Pending(other.as_str().to_string()),
                    })
                })
                .await?;
            tracing::debug!("Controller service '{}' disabled", service.name);
        }
        Ok(())
    }

    async fn drain_queues(&self, group_id: &str) -> Result<(), DeployError> {
        let groups = walk_subtree(self.api, group_id).await?;
        for connection in groups.iter().flat_map(|g| g.flow.connections.iter()) {
            self.drain(&connection.id).await?;
        }
        Ok(())
    }

    async fn drain(&self, connection_id: &str) -> Result<(), DeployError> {
        let request = self.api.create_drop_request(connection_id).await?;
        let finished = self
            .poller
            .until(&format!("queue of connection '{}' to drain", connection_id), || async {
                let status = self.api.get_drop_request(connection_id, &request.id).await?;
                Ok::<_, LiveSystemError>(if status.finished {
                    PollState::Ready(status)
                } else {
                    PollState::Pending("drop request running".to_string())
                })
            })
            .await?;

        if let Err(err) = self.api.delete_drop_request(connection_id, &request.id).await {
            tracing::warn!("Failed to clean up drop request {}: {}", request.id, err);
        }
        match finished.failure_reason {
            Some(reason) => Err(DeployError::QueueDrainFailed {
                connection_id: connection_id.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn detach(&self, parent_id: &str, group_id: &str) -> Result<(), DeployError> {
        let parent = self.api.group_flow(parent_id).await?;
        let attached = parent
            .connections
            .iter()
            .filter(|c| c.source.group_id == group_id || c.destination.group_id == group_id);

        for connection in attached {
            self.delete_connection(parent_id, connection).await?;
            tracing::debug!("Detached connection '{}' from the parent group", connection.name);
        }
        Ok(())
    }

    /// Drain `connection`, owned by `owner_id`, then delete it.
    async fn delete_connection(&self, owner_id: &str, connection: &LiveConnection) -> Result<(), DeployError> {
        self.drain(&connection.id).await?;
        self.retry
            .run("delete connection", Retryable::Conflict, || async {
                let current = self
                    .api
                    .group_flow(owner_id)
                    .await?
                    .connections
                    .into_iter()
                    .find(|c| c.id == connection.id)
                    .map(|c| c.revision)
                    .unwrap_or_else(|| connection.revision.clone());
                self.api.delete_connection(&connection.id, &current).await
            })
            .await
    }
}

fn is_bare(flow: &GroupFlow) -> bool {
    flow.processors.is_empty()
        && flow.input_ports.is_empty()
        && flow.output_ports.is_empty()
        && flow.connections.is_empty()
        && flow.child_groups.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow::{ConnectableKind, Position};
    use crate::domain::live_system::{
        ConnectableRef, NewConnection, NewControllerService, NewPort, NewProcessGroup,
    };
    use crate::domain::metadata::Bundle;
    use crate::infrastructure::in_memory::InMemoryFlowApi;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn teardown(api: &InMemoryFlowApi) -> GroupTeardown<'_> {
        GroupTeardown::new(
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

    async fn populated_group(api: &InMemoryFlowApi) -> (String, String) {
        let root = api.root_group_id().await.unwrap();
        let group = api
            .create_process_group(
                &root,
                &NewProcessGroup {
                    name: "Ingest".to_string(),
                    position: Position::new(0.0, 0.0),
                    comments: None,
                },
            )
            .await
            .unwrap();
        let port = |name: &str, kind| NewPort {
            name: name.to_string(),
            kind,
            position: Position::new(0.0, 0.0),
            allow_remote_access: false,
            comments: None,
        };
        let input = api
            .create_port(&group.id, &port("IN", ConnectableKind::InputPort))
            .await
            .unwrap();
        let output = api
            .create_port(&group.id, &port("OUT", ConnectableKind::OutputPort))
            .await
            .unwrap();
        let connection = api
            .create_connection(
                &group.id,
                &NewConnection {
                    name: "pass".to_string(),
                    source: ConnectableRef {
                        id: input.id,
                        group_id: group.id.clone(),
                        kind: ConnectableKind::InputPort,
                        name: None,
                    },
                    destination: ConnectableRef {
                        id: output.id,
                        group_id: group.id.clone(),
                        kind: ConnectableKind::OutputPort,
                        name: None,
                    },
                    relationships: vec![],
                },
            )
            .await
            .unwrap();
        api.enqueue(&connection.id, 12);

        let service = api
            .create_controller_service(
                &group.id,
                &NewControllerService {
                    name: "pool".to_string(),
                    service_type: "org.example.Pool".to_string(),
                    bundle: Some(Bundle {
                        group: "org.example".to_string(),
                        artifact: "example-nar".to_string(),
                        version: "1.0".to_string(),
                    }),
                    properties: BTreeMap::new(),
                },
            )
            .await
            .unwrap();
        api.set_controller_service_state(&service.id, &service.revision, ControllerServiceState::Enabled)
            .await
            .unwrap();
        api.schedule_process_group(&group.id, ScheduledState::Running)
            .await
            .unwrap();
        (root, group.id)
    }

    #[tokio::test]
    async fn test_teardown_stops_disables_drains_then_deletes() {
        let api = InMemoryFlowApi::new();
        let (root, group_id) = populated_group(&api).await;

        teardown(&api).remove(&root, &group_id, "Ingest").await.unwrap();

        assert_eq!(api.group_count(), 1);
        let journal = api.journal();
        let index = |prefix: &str| {
            journal
                .iter()
                .rposition(|entry| entry.starts_with(prefix))
                .unwrap()
        };
        assert!(index("schedule_process_group Ingest STOPPED") < index("set_controller_service_state pool DISABLED"));
        assert!(index("set_controller_service_state pool DISABLED") < index("create_drop_request"));
        assert!(index("create_drop_request") < index("delete_process_group Ingest"));
    }

    #[tokio::test]
    async fn test_delete_retries_conflicts() {
        let api = InMemoryFlowApi::new();
        let (root, group_id) = populated_group(&api).await;
        api.fail_next(
            "delete_process_group",
            LiveSystemError::Conflict("revision moved".to_string()),
            2,
        );

        teardown(&api).remove(&root, &group_id, "Ingest").await.unwrap();
        assert_eq!(api.group_count(), 1);
    }

    #[tokio::test]
    async fn test_purge_empties_root_but_keeps_it() {
        let api = InMemoryFlowApi::new();
        let (root, _) = populated_group(&api).await;
        let step = |name: &str| crate::domain::live_system::NewProcessor {
            name: name.to_string(),
            processor_type: "org.example.Step".to_string(),
            bundle: Bundle {
                group: "org.example".to_string(),
                artifact: "example-nar".to_string(),
                version: "1.0".to_string(),
            },
            position: Position::new(0.0, 0.0),
            properties: BTreeMap::new(),
            scheduling: Default::default(),
            auto_terminated_relationships: vec![],
            comments: None,
        };
        let a = api.create_processor(&root, &step("A")).await.unwrap();
        let b = api.create_processor(&root, &step("B")).await.unwrap();
        let reference = |id: &str| ConnectableRef {
            id: id.to_string(),
            group_id: root.clone(),
            kind: ConnectableKind::Processor,
            name: None,
        };
        let link = api
            .create_connection(
                &root,
                &NewConnection {
                    name: "a-to-b".to_string(),
                    source: reference(&a.id),
                    destination: reference(&b.id),
                    relationships: vec!["success".to_string()],
                },
            )
            .await
            .unwrap();
        api.enqueue(&link.id, 3);
        let shared = api
            .create_controller_service(
                &root,
                &NewControllerService {
                    name: "shared".to_string(),
                    service_type: "org.example.Pool".to_string(),
                    bundle: None,
                    properties: BTreeMap::new(),
                },
            )
            .await
            .unwrap();
        api.set_controller_service_state(&shared.id, &shared.revision, ControllerServiceState::Enabled)
            .await
            .unwrap();
        api.schedule_process_group(&root, ScheduledState::Running)
            .await
            .unwrap();

        teardown(&api).purge(&root).await.unwrap();

        assert_eq!(api.group_count(), 1);
        assert!(api.processors().is_empty());
        assert!(api.connections().is_empty());
        assert!(api.ports().is_empty());
        assert!(api.controller_services().is_empty());
        assert_eq!(api.root_group_id().await.unwrap(), root);

        let journal = api.journal();
        let index = |prefix: &str| journal.iter().rposition(|e| e.starts_with(prefix)).unwrap();
        assert!(index("schedule_process_group NiFi Flow STOPPED") < index("delete_connection a-to-b"));
        assert!(index("delete_connection a-to-b") < index("delete_processor B"));
        assert!(index("delete_process_group Ingest") < index("delete_processor A"));
        assert!(index("delete_processor B") < index("delete_controller_service shared"));
    }

    #[tokio::test]
    async fn test_purge_of_empty_group_is_silent() {
        let api = InMemoryFlowApi::new();
        let root = api.root_group_id().await.unwrap();
        teardown(&api).purge(&root).await.unwrap();
        assert!(api.journal().is_empty());
    }
}
