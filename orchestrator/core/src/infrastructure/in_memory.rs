// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory live system.
//!
//! Behaves like a single NiFi node closely enough for deployment and validation
//! tests: revisions are checked on every mutation, running groups and enabled
//! services refuse deletion, and queued connections refuse removal until drained.
//! Transient failures can be injected per operation, and helpers mutate the
//! canvas out-of-band the way an operator would.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use crate::domain::flow::{ConnectableKind, Position, ROOT_GROUP_NAME};
use crate::domain::live_system::*;
use crate::domain::metadata::{Bundle, ServiceImplementation, TypeMetadataProvider, TypeSchema};

#[derive(Default)]
struct Store {
    root_id: String,
    groups: BTreeMap<String, LiveProcessGroup>,
    processors: BTreeMap<String, LiveProcessor>,
    ports: BTreeMap<String, LivePort>,
    connections: BTreeMap<String, LiveConnection>,
    services: BTreeMap<String, LiveControllerService>,
    drop_requests: HashMap<String, DropRequestStatus>,
    queued: HashMap<String, u64>,
    processor_schemas: HashMap<String, TypeSchema>,
    /// (API type, implementation schema) in registration order
    service_implementations: Vec<(String, TypeSchema)>,
    failures: HashMap<&'static str, VecDeque<LiveSystemError>>,
    journal: Vec<String>,
}

impl Store {
    fn take_failure(&mut self, operation: &'static str) -> Result<(), LiveSystemError> {
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => {
                self.journal.push(format!("{} (injected failure)", operation));
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn require_group(&self, group_id: &str) -> Result<&LiveProcessGroup, LiveSystemError> {
        self.groups
            .get(group_id)
            .ok_or_else(|| LiveSystemError::NotFound(format!("process group {}", group_id)))
    }

    /// The group and all of its descendants.
    fn subtree(&self, group_id: &str) -> Vec<String> {
        let mut ids = vec![group_id.to_string()];
        let mut cursor = 0;
        while cursor < ids.len() {
            let current = ids[cursor].clone();
            ids.extend(
                self.groups
                    .values()
                    .filter(|g| g.parent_group_id.as_deref() == Some(current.as_str()))
                    .map(|g| g.id.clone()),
            );
            cursor += 1;
        }
        ids
    }

    fn connectable(&self, id: &str) -> Option<ConnectableRef> {
        if let Some(p) = self.processors.get(id) {
            return Some(ConnectableRef {
                id: p.id.clone(),
                group_id: p.group_id.clone(),
                kind: ConnectableKind::Processor,
                name: Some(p.name.clone()),
            });
        }
        self.ports.get(id).map(|p| ConnectableRef {
            id: p.id.clone(),
            group_id: p.group_id.clone(),
            kind: p.kind,
            name: Some(p.name.clone()),
        })
    }

    /// A component can only be removed once stopped and unconnected.
    fn check_detached(&self, id: &str, name: &str, state: &str) -> Result<(), LiveSystemError> {
        if state == "RUNNING" {
            return Err(LiveSystemError::Conflict(format!("{} is running", name)));
        }
        if self
            .connections
            .values()
            .any(|c| c.source.id == id || c.destination.id == id)
        {
            return Err(LiveSystemError::Conflict(format!("{} has connections", name)));
        }
        Ok(())
    }

    fn check_revision(current: &Revision, offered: &Revision, what: &str) -> Result<(), LiveSystemError> {
        if current.version != offered.version {
            return Err(LiveSystemError::Conflict(format!(
                "{} is at revision {}, request carried {}",
                what, current.version, offered.version
            )));
        }
        Ok(())
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn initial_revision() -> Revision {
    Revision {
        version: 1,
        client_id: None,
    }
}

#[derive(Clone)]
pub struct InMemoryFlowApi {
    store: Arc<Mutex<Store>>,
}

impl Default for InMemoryFlowApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFlowApi {
    pub fn new() -> Self {
        let root_id = new_id();
        let mut store = Store {
            root_id: root_id.clone(),
            ..Store::default()
        };
        store.groups.insert(
            root_id.clone(),
            LiveProcessGroup {
                id: root_id,
                name: ROOT_GROUP_NAME.to_string(),
                parent_group_id: None,
                position: Position::new(0.0, 0.0),
                revision: initial_revision(),
            },
        );
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn register_processor_type(&self, schema: TypeSchema) {
        self.store
            .lock()
            .processor_schemas
            .insert(schema.component_type.clone(), schema);
    }

    pub fn register_service_implementation(&self, api_type: &str, schema: TypeSchema) {
        self.store
            .lock()
            .service_implementations
            .push((api_type.to_string(), schema));
    }

    /// Fail the next `times` calls of `operation` (the `FlowApi` method name).
    pub fn fail_next(&self, operation: &'static str, error: LiveSystemError, times: usize) {
        let mut store = self.store.lock();
        let queue = store.failures.entry(operation).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Mutating calls in the order they were applied.
    pub fn journal(&self) -> Vec<String> {
        self.store.lock().journal.clone()
    }

    /// Remove a connection without going through revision checks.
    pub fn remove_connection_out_of_band(&self, connection_id: &str) -> bool {
        let mut store = self.store.lock();
        store.queued.remove(connection_id);
        store.connections.remove(connection_id).is_some()
    }

    pub fn set_processor_position(&self, processor_id: &str, position: Position) -> bool {
        match self.store.lock().processors.get_mut(processor_id) {
            Some(processor) => {
                processor.position = position;
                true
            }
            None => false,
        }
    }

    pub fn enqueue(&self, connection_id: &str, flowfiles: u64) {
        *self
            .store
            .lock()
            .queued
            .entry(connection_id.to_string())
            .or_default() += flowfiles;
    }

    pub fn queued(&self, connection_id: &str) -> u64 {
        self.store.lock().queued.get(connection_id).copied().unwrap_or(0)
    }

    /// Force a processor's run state, e.g. to leave a group running before redeploy.
    pub fn set_processor_state(&self, processor_id: &str, state: &str) -> bool {
        match self.store.lock().processors.get_mut(processor_id) {
            Some(processor) => {
                processor.state = state.to_string();
                true
            }
            None => false,
        }
    }

    pub fn connections(&self) -> Vec<LiveConnection> {
        self.store.lock().connections.values().cloned().collect()
    }

    pub fn processors(&self) -> Vec<LiveProcessor> {
        self.store.lock().processors.values().cloned().collect()
    }

    pub fn ports(&self) -> Vec<LivePort> {
        self.store.lock().ports.values().cloned().collect()
    }

    pub fn controller_services(&self) -> Vec<LiveControllerService> {
        self.store.lock().services.values().cloned().collect()
    }

    pub fn group_count(&self) -> usize {
        self.store.lock().groups.len()
    }
}

#[async_trait]
impl FlowApi for InMemoryFlowApi {
    async fn root_group_id(&self) -> Result<String, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("root_group_id")?;
        Ok(store.root_id.clone())
    }

    async fn group_flow(&self, group_id: &str) -> Result<GroupFlow, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("group_flow")?;
        let group = store.require_group(group_id)?.clone();

        let ports_of = |kind: ConnectableKind| {
            store
                .ports
                .values()
                .filter(|p| p.group_id == group_id && p.kind == kind)
                .cloned()
                .collect::<Vec<_>>()
        };

        Ok(GroupFlow {
            processors: store
                .processors
                .values()
                .filter(|p| p.group_id == group_id)
                .cloned()
                .collect(),
            input_ports: ports_of(ConnectableKind::InputPort),
            output_ports: ports_of(ConnectableKind::OutputPort),
            connections: store
                .connections
                .values()
                .filter(|c| c.group_id == group_id)
                .cloned()
                .collect(),
            child_groups: store
                .groups
                .values()
                .filter(|g| g.parent_group_id.as_deref() == Some(group_id))
                .cloned()
                .collect(),
            group,
        })
    }

    async fn get_process_group(&self, group_id: &str) -> Result<LiveProcessGroup, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("get_process_group")?;
        Ok(store.require_group(group_id)?.clone())
    }

    async fn create_process_group(
        &self,
        parent_id: &str,
        request: &NewProcessGroup,
    ) -> Result<LiveProcessGroup, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("create_process_group")?;
        store.require_group(parent_id)?;

        let group = LiveProcessGroup {
            id: new_id(),
            name: request.name.clone(),
            parent_group_id: Some(parent_id.to_string()),
            position: request.position,
            revision: initial_revision(),
        };
        store.journal.push(format!("create_process_group {}", request.name));
        store.groups.insert(group.id.clone(), group.clone());
        Ok(group)
    }

    async fn delete_process_group(
        &self,
        group_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("delete_process_group")?;
        let group = store.require_group(group_id)?.clone();
        Store::check_revision(&group.revision, revision, "process group")?;

        let subtree = store.subtree(group_id);
        let in_subtree = |owner: &str| subtree.iter().any(|id| id == owner);

        if store
            .processors
            .values()
            .any(|p| in_subtree(&p.group_id) && p.state == "RUNNING")
        {
            return Err(LiveSystemError::Conflict(format!(
                "process group {} has running components",
                group.name
            )));
        }
        if store
            .services
            .values()
            .any(|s| in_subtree(&s.group_id) && s.state != ControllerServiceState::Disabled)
        {
            return Err(LiveSystemError::Conflict(format!(
                "process group {} has enabled controller services",
                group.name
            )));
        }
        if store.connections.values().any(|c| {
            in_subtree(&c.group_id) && store.queued.get(&c.id).copied().unwrap_or(0) > 0
        }) {
            return Err(LiveSystemError::Conflict(format!(
                "process group {} has queued flowfiles",
                group.name
            )));
        }

        if store.connections.values().any(|c| {
            !in_subtree(&c.group_id)
                && (in_subtree(&c.source.group_id) || in_subtree(&c.destination.group_id))
        }) {
            return Err(LiveSystemError::Conflict(format!(
                "process group {} is still connected to its parent",
                group.name
            )));
        }

        store.processors.retain(|_, p| !in_subtree(&p.group_id));
        store.ports.retain(|_, p| !in_subtree(&p.group_id));
        store.services.retain(|_, s| !in_subtree(&s.group_id));
        let removed: Vec<String> = store
            .connections
            .values()
            .filter(|c| in_subtree(&c.group_id))
            .map(|c| c.id.clone())
            .collect();
        for id in removed {
            store.connections.remove(&id);
            store.queued.remove(&id);
        }
        store.groups.retain(|id, _| !in_subtree(id));
        store.journal.push(format!("delete_process_group {}", group.name));
        Ok(())
    }

    async fn create_port(&self, group_id: &str, request: &NewPort) -> Result<LivePort, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("create_port")?;
        store.require_group(group_id)?;

        let port = LivePort {
            id: new_id(),
            group_id: group_id.to_string(),
            name: request.name.clone(),
            kind: request.kind,
            position: request.position,
            state: "STOPPED".to_string(),
            revision: initial_revision(),
        };
        store
            .journal
            .push(format!("create_port {} {}", request.kind.as_str(), request.name));
        store.ports.insert(port.id.clone(), port.clone());
        Ok(port)
    }

    async fn delete_port(
        &self,
        port_id: &str,
        kind: ConnectableKind,
        revision: &Revision,
    ) -> Result<(), LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("delete_port")?;
        let port = store
            .ports
            .get(port_id)
            .filter(|p| p.kind == kind)
            .ok_or_else(|| LiveSystemError::NotFound(format!("{} {}", kind.as_str(), port_id)))?
            .clone();
        Store::check_revision(&port.revision, revision, "port")?;
        store.check_detached(port_id, &port.name, &port.state)?;

        store.ports.remove(port_id);
        store
            .journal
            .push(format!("delete_port {} {}", kind.as_str(), port.name));
        Ok(())
    }

    async fn create_processor(
        &self,
        group_id: &str,
        request: &NewProcessor,
    ) -> Result<LiveProcessor, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("create_processor")?;
        store.require_group(group_id)?;

        if let Some(schema) = store.processor_schemas.get(&request.processor_type) {
            for rel in &request.auto_terminated_relationships {
                if schema.canonical_relationship(rel).is_none() && !schema.supports_dynamic_relationships {
                    return Err(LiveSystemError::Http {
                        status: 400,
                        message: format!("unknown relationship {} on {}", rel, request.processor_type),
                    });
                }
            }
        }

        let processor = LiveProcessor {
            id: new_id(),
            group_id: group_id.to_string(),
            name: request.name.clone(),
            processor_type: request.processor_type.clone(),
            position: request.position,
            state: "STOPPED".to_string(),
            revision: initial_revision(),
        };
        store.journal.push(format!("create_processor {}", request.name));
        store.processors.insert(processor.id.clone(), processor.clone());
        Ok(processor)
    }

    async fn delete_processor(
        &self,
        processor_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("delete_processor")?;
        let processor = store
            .processors
            .get(processor_id)
            .ok_or_else(|| LiveSystemError::NotFound(format!("processor {}", processor_id)))?
            .clone();
        Store::check_revision(&processor.revision, revision, "processor")?;
        store.check_detached(processor_id, &processor.name, &processor.state)?;

        store.processors.remove(processor_id);
        store.journal.push(format!("delete_processor {}", processor.name));
        Ok(())
    }

    async fn create_connection(
        &self,
        group_id: &str,
        request: &NewConnection,
    ) -> Result<LiveConnection, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("create_connection")?;
        store.require_group(group_id)?;

        let source = store
            .connectable(&request.source.id)
            .ok_or_else(|| LiveSystemError::NotFound(format!("source {}", request.source.id)))?;
        let destination = store.connectable(&request.destination.id).ok_or_else(|| {
            LiveSystemError::NotFound(format!("destination {}", request.destination.id))
        })?;

        let connection = LiveConnection {
            id: new_id(),
            group_id: group_id.to_string(),
            name: request.name.clone(),
            source,
            destination,
            relationships: request.relationships.clone(),
            revision: initial_revision(),
        };
        store.journal.push(format!("create_connection {}", request.name));
        store.connections.insert(connection.id.clone(), connection.clone());
        Ok(connection)
    }

    async fn delete_connection(
        &self,
        connection_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("delete_connection")?;
        let connection = store
            .connections
            .get(connection_id)
            .ok_or_else(|| LiveSystemError::NotFound(format!("connection {}", connection_id)))?
            .clone();
        Store::check_revision(&connection.revision, revision, "connection")?;
        if store.queued.get(connection_id).copied().unwrap_or(0) > 0 {
            return Err(LiveSystemError::Conflict(format!(
                "connection {} has queued flowfiles",
                connection_id
            )));
        }
        store.connections.remove(connection_id);
        store.journal.push(format!("delete_connection {}", connection.name));
        Ok(())
    }

    async fn schedule_process_group(
        &self,
        group_id: &str,
        state: ScheduledState,
    ) -> Result<(), LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("schedule_process_group")?;
        let name = store.require_group(group_id)?.name.clone();
        let subtree = store.subtree(group_id);

        for processor in store.processors.values_mut() {
            if subtree.contains(&processor.group_id) && processor.state != "DISABLED" {
                processor.state = state.as_str().to_string();
                processor.revision.version += 1;
            }
        }
        for port in store.ports.values_mut() {
            if subtree.contains(&port.group_id) && port.state != "DISABLED" {
                port.state = state.as_str().to_string();
                port.revision.version += 1;
            }
        }
        store
            .journal
            .push(format!("schedule_process_group {} {}", name, state.as_str()));
        Ok(())
    }

    async fn list_controller_services(
        &self,
        group_id: &str,
    ) -> Result<Vec<LiveControllerService>, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("list_controller_services")?;
        store.require_group(group_id)?;
        let subtree = store.subtree(group_id);
        Ok(store
            .services
            .values()
            .filter(|s| subtree.contains(&s.group_id))
            .cloned()
            .collect())
    }

    async fn get_controller_service(
        &self,
        service_id: &str,
    ) -> Result<LiveControllerService, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("get_controller_service")?;
        store
            .services
            .get(service_id)
            .cloned()
            .ok_or_else(|| LiveSystemError::NotFound(format!("controller service {}", service_id)))
    }

    async fn create_controller_service(
        &self,
        group_id: &str,
        request: &NewControllerService,
    ) -> Result<LiveControllerService, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("create_controller_service")?;
        store.require_group(group_id)?;

        let service = LiveControllerService {
            id: new_id(),
            group_id: group_id.to_string(),
            name: request.name.clone(),
            service_type: request.service_type.clone(),
            state: ControllerServiceState::Disabled,
            properties: request.properties.clone(),
            revision: initial_revision(),
        };
        store
            .journal
            .push(format!("create_controller_service {}", request.name));
        store.services.insert(service.id.clone(), service.clone());
        Ok(service)
    }

    async fn update_controller_service(
        &self,
        service_id: &str,
        revision: &Revision,
        properties: &BTreeMap<String, String>,
    ) -> Result<LiveControllerService, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("update_controller_service")?;
        let service = store
            .services
            .get_mut(service_id)
            .ok_or_else(|| LiveSystemError::NotFound(format!("controller service {}", service_id)))?;
        Store::check_revision(&service.revision, revision, "controller service")?;
        if service.state != ControllerServiceState::Disabled {
            return Err(LiveSystemError::Conflict(format!(
                "controller service {} is {}",
                service.name,
                service.state.as_str()
            )));
        }

        service
            .properties
            .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        service.revision.version += 1;
        let updated = service.clone();
        store
            .journal
            .push(format!("update_controller_service {}", updated.name));
        Ok(updated)
    }

    async fn delete_controller_service(
        &self,
        service_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("delete_controller_service")?;
        let service = store
            .services
            .get(service_id)
            .ok_or_else(|| LiveSystemError::NotFound(format!("controller service {}", service_id)))?
            .clone();
        Store::check_revision(&service.revision, revision, "controller service")?;
        if service.state != ControllerServiceState::Disabled {
            return Err(LiveSystemError::Conflict(format!(
                "controller service {} is {}",
                service.name,
                service.state.as_str()
            )));
        }

        store.services.remove(service_id);
        store
            .journal
            .push(format!("delete_controller_service {}", service.name));
        Ok(())
    }

    async fn set_controller_service_state(
        &self,
        service_id: &str,
        revision: &Revision,
        state: ControllerServiceState,
    ) -> Result<LiveControllerService, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("set_controller_service_state")?;
        let service = store
            .services
            .get_mut(service_id)
            .ok_or_else(|| LiveSystemError::NotFound(format!("controller service {}", service_id)))?;
        Store::check_revision(&service.revision, revision, "controller service")?;

        service.state = state;
        service.revision.version += 1;
        let updated = service.clone();
        store.journal.push(format!(
            "set_controller_service_state {} {}",
            updated.name,
            state.as_str()
        ));
        Ok(updated)
    }

    async fn create_drop_request(
        &self,
        connection_id: &str,
    ) -> Result<DropRequestStatus, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("create_drop_request")?;
        if !store.connections.contains_key(connection_id) {
            return Err(LiveSystemError::NotFound(format!("connection {}", connection_id)));
        }
        store.queued.remove(connection_id);

        let status = DropRequestStatus {
            id: new_id(),
            connection_id: connection_id.to_string(),
            finished: true,
            failure_reason: None,
        };
        store.journal.push(format!("create_drop_request {}", connection_id));
        store.drop_requests.insert(status.id.clone(), status.clone());
        Ok(status)
    }

    async fn get_drop_request(
        &self,
        connection_id: &str,
        request_id: &str,
    ) -> Result<DropRequestStatus, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("get_drop_request")?;
        store
            .drop_requests
            .get(request_id)
            .filter(|r| r.connection_id == connection_id)
            .cloned()
            .ok_or_else(|| LiveSystemError::NotFound(format!("drop request {}", request_id)))
    }

    async fn delete_drop_request(
        &self,
        _connection_id: &str,
        request_id: &str,
    ) -> Result<(), LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("delete_drop_request")?;
        store.drop_requests.remove(request_id);
        Ok(())
    }
}

#[async_trait]
impl TypeMetadataProvider for InMemoryFlowApi {
    async fn processor_schema(&self, processor_type: &str) -> Result<TypeSchema, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("processor_schema")?;
        store
            .processor_schemas
            .get(processor_type)
            .cloned()
            .ok_or_else(|| LiveSystemError::NotFound(format!("processor type {}", processor_type)))
    }

    async fn service_implementations(
        &self,
        api_type: &str,
        _api_bundle: Option<&Bundle>,
    ) -> Result<Vec<ServiceImplementation>, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("service_implementations")?;
        Ok(store
            .service_implementations
            .iter()
            .filter(|(api, _)| api == api_type)
            .map(|(_, schema)| ServiceImplementation {
                service_type: schema.component_type.clone(),
                bundle: schema.bundle.clone(),
            })
            .collect())
    }

    async fn service_schema(
        &self,
        service_type: &str,
        bundle: &Bundle,
    ) -> Result<TypeSchema, LiveSystemError> {
        let mut store = self.store.lock();
        store.take_failure("service_schema")?;
        store
            .service_implementations
            .iter()
            .map(|(_, schema)| schema)
            .find(|s| s.component_type == service_type && &s.bundle == bundle)
            .cloned()
            .ok_or_else(|| LiveSystemError::NotFound(format!("controller service type {}", service_type)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor_request(name: &str) -> NewProcessor {
        NewProcessor {
            name: name.to_string(),
            processor_type: "org.example.Gen".to_string(),
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
        }
    }

    #[tokio::test]
    async fn test_running_group_refuses_delete() {
        let api = InMemoryFlowApi::new();
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
        api.create_processor(&group.id, &processor_request("gen")).await.unwrap();
        api.schedule_process_group(&group.id, ScheduledState::Running)
            .await
            .unwrap();

        let err = api
            .delete_process_group(&group.id, &group.revision)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        api.schedule_process_group(&group.id, ScheduledState::Stopped)
            .await
            .unwrap();
        api.delete_process_group(&group.id, &group.revision).await.unwrap();
        assert_eq!(api.group_count(), 1);
        assert!(api.processors().is_empty());
    }

    #[tokio::test]
    async fn test_stale_revision_is_conflict() {
        let api = InMemoryFlowApi::new();
        let root = api.root_group_id().await.unwrap();
        let group = api
            .create_process_group(
                &root,
                &NewProcessGroup {
                    name: "G".to_string(),
                    position: Position::new(0.0, 0.0),
                    comments: None,
                },
            )
            .await
            .unwrap();
        let stale = Revision {
            version: 0,
            client_id: None,
        };
        assert!(api.delete_process_group(&group.id, &stale).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let api = InMemoryFlowApi::new();
        api.fail_next("root_group_id", LiveSystemError::NotFound("warming up".to_string()), 2);

        assert!(api.root_group_id().await.unwrap_err().is_not_found());
        assert!(api.root_group_id().await.unwrap_err().is_not_found());
        assert!(api.root_group_id().await.is_ok());
    }

    #[tokio::test]
    async fn test_connected_processor_refuses_delete() {
        let api = InMemoryFlowApi::new();
        let root = api.root_group_id().await.unwrap();
        let a = api.create_processor(&root, &processor_request("a")).await.unwrap();
        let b = api.create_processor(&root, &processor_request("b")).await.unwrap();
        let reference = |p: &LiveProcessor| ConnectableRef {
            id: p.id.clone(),
            group_id: root.clone(),
            kind: ConnectableKind::Processor,
            name: None,
        };
        let connection = api
            .create_connection(
                &root,
                &NewConnection {
                    name: "a-to-b".to_string(),
                    source: reference(&a),
                    destination: reference(&b),
                    relationships: vec!["success".to_string()],
                },
            )
            .await
            .unwrap();

        assert!(api.delete_processor(&b.id, &b.revision).await.unwrap_err().is_conflict());
        api.delete_connection(&connection.id, &connection.revision).await.unwrap();
        api.delete_processor(&b.id, &b.revision).await.unwrap();
        assert_eq!(api.processors().len(), 1);
    }

    #[tokio::test]
    async fn test_enabled_service_refuses_update_and_delete() {
        let api = InMemoryFlowApi::new();
        let root = api.root_group_id().await.unwrap();
        let created = api
            .create_controller_service(
                &root,
                &NewControllerService {
                    name: "reader".to_string(),
                    service_type: "org.example.Reader".to_string(),
                    bundle: None,
                    properties: BTreeMap::from([("schema".to_string(), "v1".to_string())]),
                },
            )
            .await
            .unwrap();
        let enabled = api
            .set_controller_service_state(&created.id, &created.revision, ControllerServiceState::Enabled)
            .await
            .unwrap();

        let update = BTreeMap::from([("schema".to_string(), "v2".to_string())]);
        let err = api
            .update_controller_service(&enabled.id, &enabled.revision, &update)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(api
            .delete_controller_service(&enabled.id, &enabled.revision)
            .await
            .unwrap_err()
            .is_conflict());

        let disabled = api
            .set_controller_service_state(&enabled.id, &enabled.revision, ControllerServiceState::Disabled)
            .await
            .unwrap();
        let updated = api
            .update_controller_service(&disabled.id, &disabled.revision, &update)
            .await
            .unwrap();
        assert_eq!(updated.properties["schema"], "v2");
        api.delete_controller_service(&updated.id, &updated.revision).await.unwrap();
        assert!(api.controller_services().is_empty());
    }
}
