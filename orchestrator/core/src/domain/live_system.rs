// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Live System Interface
//!
//! Contract for the running NiFi instance the deployer reconciles against. The
//! interface is defined in the domain layer and implemented in
//! `crate::infrastructure`:
//!
//! | Trait | Implementations |
//! |-------|----------------|
//! | `FlowApi` | `NifiClient`, `InMemoryFlowApi` |
//!
//! Every mutation of an existing component carries the component's [`Revision`];
//! NiFi rejects stale revisions with `409 Conflict`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::flow::{ConnectableKind, Position, SchedulingSpec};
use crate::domain::metadata::Bundle;

/// Optimistic-locking revision of a live component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveProcessGroup {
    pub id: String,
    pub name: String,
    pub parent_group_id: Option<String>,
    pub position: Position,
    pub revision: Revision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveProcessor {
    pub id: String,
    pub group_id: String,
    pub name: String,
    pub processor_type: String,
    pub position: Position,
    /// RUNNING, STOPPED, DISABLED, ...
    pub state: String,
    pub revision: Revision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePort {
    pub id: String,
    pub group_id: String,
    pub name: String,
    pub kind: ConnectableKind,
    pub position: Position,
    pub state: String,
    pub revision: Revision,
}

/// One end of a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectableRef {
    pub id: String,
    pub group_id: String,
    pub kind: ConnectableKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConnection {
    pub id: String,
    pub group_id: String,
    pub name: String,
    pub source: ConnectableRef,
    pub destination: ConnectableRef,
    pub relationships: Vec<String>,
    pub revision: Revision,
}

/// Snapshot of one group's immediate contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupFlow {
    pub group: LiveProcessGroup,
    pub processors: Vec<LiveProcessor>,
    pub input_ports: Vec<LivePort>,
    pub output_ports: Vec<LivePort>,
    pub connections: Vec<LiveConnection>,
    pub child_groups: Vec<LiveProcessGroup>,
}

impl GroupFlow {
    pub fn child_named(&self, name: &str) -> Option<&LiveProcessGroup> {
        self.child_groups.iter().find(|g| g.name == name)
    }
}

/// Target run state of a process group's components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduledState {
    Running,
    Stopped,
}

impl ScheduledState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduledState::Running => "RUNNING",
            ScheduledState::Stopped => "STOPPED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerServiceState {
    Enabled,
    Enabling,
    Disabled,
    Disabling,
}

impl ControllerServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerServiceState::Enabled => "ENABLED",
            ControllerServiceState::Enabling => "ENABLING",
            ControllerServiceState::Disabled => "DISABLED",
            ControllerServiceState::Disabling => "DISABLING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ENABLED" => Some(Self::Enabled),
            "ENABLING" => Some(Self::Enabling),
            "DISABLED" => Some(Self::Disabled),
            "DISABLING" => Some(Self::Disabling),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveControllerService {
    pub id: String,
    pub group_id: String,
    pub name: String,
    pub service_type: String,
    pub state: ControllerServiceState,
    /// Explicitly set properties; unset ones are omitted
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub revision: Revision,
}

/// Progress of a queue drop request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropRequestStatus {
    pub id: String,
    pub connection_id: String,
    pub finished: bool,
    pub failure_reason: Option<String>,
}

// ============================================================================
// Creation requests
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NewProcessGroup {
    pub name: String,
    pub position: Position,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPort {
    pub name: String,
    pub kind: ConnectableKind,
    pub position: Position,
    pub allow_remote_access: bool,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProcessor {
    pub name: String,
    pub processor_type: String,
    pub bundle: Bundle,
    pub position: Position,
    pub properties: BTreeMap<String, String>,
    pub scheduling: SchedulingSpec,
    pub auto_terminated_relationships: Vec<String>,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewConnection {
    pub name: String,
    pub source: ConnectableRef,
    pub destination: ConnectableRef,
    pub relationships: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewControllerService {
    pub name: String,
    pub service_type: String,
    /// Omitted when the type is provided by a single bundle
    pub bundle: Option<Bundle>,
    pub properties: BTreeMap<String, String>,
}

/// Live system collaborator used by the orchestrator and the validators.
#[async_trait]
pub trait FlowApi: Send + Sync {
    /// Id of the canvas root group
    async fn root_group_id(&self) -> Result<String, LiveSystemError>;

    async fn group_flow(&self, group_id: &str) -> Result<GroupFlow, LiveSystemError>;

    async fn get_process_group(&self, group_id: &str) -> Result<LiveProcessGroup, LiveSystemError>;

    async fn create_process_group(
        &self,
        parent_id: &str,
        request: &NewProcessGroup,
    ) -> Result<LiveProcessGroup, LiveSystemError>;

    /// Recursive delete; the group must be stopped and drained
    async fn delete_process_group(
        &self,
        group_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError>;

    async fn create_port(
        &self,
        group_id: &str,
        request: &NewPort,
    ) -> Result<LivePort, LiveSystemError>;

    /// The port must be stopped and unconnected
    async fn delete_port(
        &self,
        port_id: &str,
        kind: ConnectableKind,
        revision: &Revision,
    ) -> Result<(), LiveSystemError>;

    async fn create_processor(
        &self,
        group_id: &str,
        request: &NewProcessor,
    ) -> Result<LiveProcessor, LiveSystemError>;

    /// The processor must be stopped and unconnected
    async fn delete_processor(
        &self,
        processor_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError>;

    async fn create_connection(
        &self,
        group_id: &str,
        request: &NewConnection,
    ) -> Result<LiveConnection, LiveSystemError>;

    async fn delete_connection(
        &self,
        connection_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError>;

    /// Start or stop every component in the group and its descendants
    async fn schedule_process_group(
        &self,
        group_id: &str,
        state: ScheduledState,
    ) -> Result<(), LiveSystemError>;

    /// Controller services owned by the group and its descendants
    async fn list_controller_services(
        &self,
        group_id: &str,
    ) -> Result<Vec<LiveControllerService>, LiveSystemError>;

    async fn get_controller_service(
        &self,
        service_id: &str,
    ) -> Result<LiveControllerService, LiveSystemError>;

    async fn create_controller_service(
        &self,
        group_id: &str,
        request: &NewControllerService,
    ) -> Result<LiveControllerService, LiveSystemError>;

    /// Replace the given properties; the service must be disabled
    async fn update_controller_service(
        &self,
        service_id: &str,
        revision: &Revision,
        properties: &BTreeMap<String, String>,
    ) -> Result<LiveControllerService, LiveSystemError>;

    /// The service must be disabled
    async fn delete_controller_service(
        &self,
        service_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError>;

    async fn set_controller_service_state(
        &self,
        service_id: &str,
        revision: &Revision,
        state: ControllerServiceState,
    ) -> Result<LiveControllerService, LiveSystemError>;

    async fn create_drop_request(
        &self,
        connection_id: &str,
    ) -> Result<DropRequestStatus, LiveSystemError>;

    async fn get_drop_request(
        &self,
        connection_id: &str,
        request_id: &str,
    ) -> Result<DropRequestStatus, LiveSystemError>;

    async fn delete_drop_request(
        &self,
        connection_id: &str,
        request_id: &str,
    ) -> Result<(), LiveSystemError>;
}

/// Errors raised by the live system or the transport to it.
///
/// `NotFound` and `Conflict` are the transient classes the orchestrator retries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LiveSystemError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl LiveSystemError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LiveSystemError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LiveSystemError::Conflict(_))
    }

    /// Classify an HTTP failure status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => LiveSystemError::NotFound(message),
            409 => LiveSystemError::Conflict(message),
            _ => LiveSystemError::Http { status, message },
        }
    }
}

impl From<serde_json::Error> for LiveSystemError {
    fn from(err: serde_json::Error) -> Self {
        LiveSystemError::Decode(err.to_string())
    }
}
