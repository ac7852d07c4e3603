// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! NiFi REST Client
//!
//! HTTP client for the NiFi REST API, implementing both [`FlowApi`] and
//! [`TypeMetadataProvider`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** REST communication with a running NiFi instance
//! - **Integration:** Deployment Orchestrator → NiFi `/nifi-api`
//!
//! # Authentication
//!
//! - A configured bearer token is used as-is.
//! - Otherwise username/password are exchanged for a token at `/access/token`.
//! - With neither, requests are sent unauthenticated (plain HTTP installs).
//!
//! # Error Mapping
//!
//! `404` becomes [`LiveSystemError::NotFound`] and `409` becomes
//! [`LiveSystemError::Conflict`]; the orchestrator retries those two classes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::domain::deployer_config::NifiConfig;
use crate::domain::flow::{ConnectableKind, Position};
use crate::domain::live_system::*;
use crate::domain::metadata::*;

#[derive(Clone)]
pub struct NifiClient {
    http: HttpClient,
    base_url: String,
    token: Option<String>,
    client_id: String,
}

impl NifiClient {
    /// Build the HTTP client and acquire a token if credentials are configured.
    pub async fn connect(config: &NifiConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .context("Failed to build NiFi HTTP client")?;
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let token = match (&config.token, &config.username, &config.password) {
            (Some(token), _, _) => Some(token.clone()),
            (None, Some(username), Some(password)) => {
                Some(Self::obtain_token(&http, &base_url, username, password).await?)
            }
            _ => None,
        };

        Ok(Self {
            http,
            base_url,
            token,
            client_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    async fn obtain_token(
        http: &HttpClient,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<String> {
        let response = http
            .post(format!("{}/access/token", base_url))
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .context("Failed to reach NiFi token endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to obtain token ({}): {}", status, body);
        }

        let token = response.text().await?.trim().to_string();
        if token.is_empty() {
            anyhow::bail!("NiFi returned an empty token response");
        }
        tracing::debug!("Obtained NiFi access token for {}", username);
        Ok(token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, LiveSystemError> {
        let response = builder
            .send()
            .await
            .map_err(|e| LiveSystemError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LiveSystemError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(LiveSystemError::from_status(status.as_u16(), body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, LiveSystemError> {
        let value = self.send(self.request(Method::GET, path)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, LiveSystemError> {
        let value = self.send(self.request(Method::GET, path).query(query)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, LiveSystemError> {
        let value = self.send(self.request(Method::POST, path).json(body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn put<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, LiveSystemError> {
        let value = self.send(self.request(Method::PUT, path).json(body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn delete(&self, path: &str, revision: Option<&Revision>) -> Result<(), LiveSystemError> {
        let mut builder = self.request(Method::DELETE, path);
        if let Some(revision) = revision {
            let version = revision.version.to_string();
            builder = builder.query(&[
                ("version", version.as_str()),
                ("clientId", self.client_id.as_str()),
            ]);
        }
        self.send(builder).await?;
        Ok(())
    }

    fn fresh_revision(&self) -> Value {
        json!({ "clientId": self.client_id, "version": 0 })
    }

    async fn definition(
        &self,
        kind: &str,
        type_name: &str,
        bundle: &Bundle,
    ) -> Result<TypeSchema, LiveSystemError> {
        let path = format!(
            "/flow/{}-definition/{}/{}/{}/{}",
            kind, bundle.group, bundle.artifact, bundle.version, type_name
        );
        let definition: ComponentDefinitionDto = self.get(&path).await?;
        Ok(definition.into_schema(type_name, bundle.clone()))
    }
}

#[async_trait]
impl FlowApi for NifiClient {
    async fn root_group_id(&self) -> Result<String, LiveSystemError> {
        let entity: ProcessGroupFlowEntity = self.get("/flow/process-groups/root").await?;
        Ok(entity.process_group_flow.id)
    }

    async fn group_flow(&self, group_id: &str) -> Result<GroupFlow, LiveSystemError> {
        let entity: ProcessGroupFlowEntity =
            self.get(&format!("/flow/process-groups/{}", group_id)).await?;
        entity.process_group_flow.into_domain()
    }

    async fn get_process_group(&self, group_id: &str) -> Result<LiveProcessGroup, LiveSystemError> {
        let entity: ProcessGroupEntity = self.get(&format!("/process-groups/{}", group_id)).await?;
        Ok(entity.into_domain())
    }

    async fn create_process_group(
        &self,
        parent_id: &str,
        request: &NewProcessGroup,
    ) -> Result<LiveProcessGroup, LiveSystemError> {
        let body = json!({
            "revision": self.fresh_revision(),
            "component": {
                "name": request.name,
                "position": { "x": request.position.x, "y": request.position.y },
                "comments": request.comments.clone().unwrap_or_default(),
            }
        });
        let entity: ProcessGroupEntity = self
            .post(&format!("/process-groups/{}/process-groups", parent_id), &body)
            .await?;
        Ok(entity.into_domain())
    }

    async fn delete_process_group(
        &self,
        group_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError> {
        self.delete(&format!("/process-groups/{}", group_id), Some(revision))
            .await
    }

    async fn create_port(&self, group_id: &str, request: &NewPort) -> Result<LivePort, LiveSystemError> {
        let segment = match request.kind {
            ConnectableKind::InputPort => "input-ports",
            _ => "output-ports",
        };
        let body = json!({
            "revision": self.fresh_revision(),
            "component": {
                "name": request.name,
                "position": { "x": request.position.x, "y": request.position.y },
                "allowRemoteAccess": request.allow_remote_access,
                "comments": request.comments.clone().unwrap_or_default(),
            }
        });
        let entity: PortEntity = self
            .post(&format!("/process-groups/{}/{}", group_id, segment), &body)
            .await?;
        Ok(entity.into_domain(request.kind, group_id))
    }

    async fn delete_port(
        &self,
        port_id: &str,
        kind: ConnectableKind,
        revision: &Revision,
    ) -> Result<(), LiveSystemError> {
        let segment = match kind {
            ConnectableKind::InputPort => "input-ports",
            _ => "output-ports",
        };
        self.delete(&format!("/{}/{}", segment, port_id), Some(revision))
            .await
    }

    async fn create_processor(
        &self,
        group_id: &str,
        request: &NewProcessor,
    ) -> Result<LiveProcessor, LiveSystemError> {
        let scheduling = &request.scheduling;
        let mut config = json!({
            "properties": request.properties,
            "autoTerminatedRelationships": request.auto_terminated_relationships,
            "schedulingStrategy": scheduling.strategy.clone().unwrap_or_else(|| "TIMER_DRIVEN".to_string()),
            "schedulingPeriod": scheduling.period.clone().unwrap_or_else(|| "0 sec".to_string()),
            "comments": request.comments.clone().unwrap_or_default(),
        });
        if let Some(config) = config.as_object_mut() {
            if let Some(tasks) = scheduling.concurrent_tasks {
                config.insert("concurrentlySchedulableTaskCount".to_string(), json!(tasks));
            }
            if let Some(run_duration) = scheduling.run_duration_millis {
                config.insert("runDurationMillis".to_string(), json!(run_duration));
            }
            if let Some(penalty) = &scheduling.penalty_duration {
                config.insert("penaltyDuration".to_string(), json!(penalty));
            }
            if let Some(yield_duration) = &scheduling.yield_duration {
                config.insert("yieldDuration".to_string(), json!(yield_duration));
            }
            if let Some(level) = &scheduling.bulletin_level {
                config.insert("bulletinLevel".to_string(), json!(level));
            }
        }

        let body = json!({
            "revision": self.fresh_revision(),
            "component": {
                "name": request.name,
                "type": request.processor_type,
                "bundle": {
                    "group": request.bundle.group,
                    "artifact": request.bundle.artifact,
                    "version": request.bundle.version,
                },
                "position": { "x": request.position.x, "y": request.position.y },
                "config": config,
            }
        });
        let entity: ProcessorEntity = self
            .post(&format!("/process-groups/{}/processors", group_id), &body)
            .await?;
        Ok(entity.into_domain(group_id))
    }

    async fn delete_processor(
        &self,
        processor_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError> {
        self.delete(&format!("/processors/{}", processor_id), Some(revision))
            .await
    }

    async fn create_connection(
        &self,
        group_id: &str,
        request: &NewConnection,
    ) -> Result<LiveConnection, LiveSystemError> {
        let endpoint = |c: &ConnectableRef| {
            json!({ "id": c.id, "groupId": c.group_id, "type": c.kind.as_str() })
        };
        let body = json!({
            "revision": self.fresh_revision(),
            "component": {
                "name": request.name,
                "source": endpoint(&request.source),
                "destination": endpoint(&request.destination),
                "selectedRelationships": request.relationships,
                "flowFileExpiration": "0 sec",
                "backPressureObjectThreshold": 10000,
                "backPressureDataSizeThreshold": "1 GB",
                "loadBalanceStrategy": "DO_NOT_LOAD_BALANCE",
                "loadBalanceCompression": "DO_NOT_COMPRESS",
                "bends": [],
            }
        });
        let entity: ConnectionEntity = self
            .post(&format!("/process-groups/{}/connections", group_id), &body)
            .await?;
        entity.into_domain(group_id)
    }

    async fn delete_connection(
        &self,
        connection_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError> {
        self.delete(&format!("/connections/{}", connection_id), Some(revision))
            .await
    }

    async fn schedule_process_group(
        &self,
        group_id: &str,
        state: ScheduledState,
    ) -> Result<(), LiveSystemError> {
        let body = json!({ "id": group_id, "state": state.as_str() });
        let _: Value = self
            .put(&format!("/flow/process-groups/{}", group_id), &body)
            .await?;
        Ok(())
    }

    async fn list_controller_services(
        &self,
        group_id: &str,
    ) -> Result<Vec<LiveControllerService>, LiveSystemError> {
        let entity: ControllerServicesEntity = self
            .get_with_query(
                &format!("/flow/process-groups/{}/controller-services", group_id),
                &[
                    ("includeAncestorGroups", "false"),
                    ("includeDescendantGroups", "true"),
                ],
            )
            .await?;
        entity
            .controller_services
            .into_iter()
            .map(ControllerServiceEntity::into_domain)
            .collect()
    }

    async fn get_controller_service(
        &self,
        service_id: &str,
    ) -> Result<LiveControllerService, LiveSystemError> {
        let entity: ControllerServiceEntity =
            self.get(&format!("/controller-services/{}", service_id)).await?;
        entity.into_domain()
    }

    async fn create_controller_service(
        &self,
        group_id: &str,
        request: &NewControllerService,
    ) -> Result<LiveControllerService, LiveSystemError> {
        let mut component = json!({
            "name": request.name,
            "type": request.service_type,
            "properties": request.properties,
        });
        if let (Some(bundle), Some(component)) = (&request.bundle, component.as_object_mut()) {
            component.insert(
                "bundle".to_string(),
                json!({
                    "group": bundle.group,
                    "artifact": bundle.artifact,
                    "version": bundle.version,
                }),
            );
        }
        let body = json!({
            "revision": self.fresh_revision(),
            "component": component,
        });
        let entity: ControllerServiceEntity = self
            .post(&format!("/process-groups/{}/controller-services", group_id), &body)
            .await?;
        entity.into_domain()
    }

    async fn update_controller_service(
        &self,
        service_id: &str,
        revision: &Revision,
        properties: &BTreeMap<String, String>,
    ) -> Result<LiveControllerService, LiveSystemError> {
        let body = json!({
            "revision": { "clientId": self.client_id, "version": revision.version },
            "component": {
                "id": service_id,
                "properties": properties,
            }
        });
        let entity: ControllerServiceEntity = self
            .put(&format!("/controller-services/{}", service_id), &body)
            .await?;
        entity.into_domain()
    }

    async fn delete_controller_service(
        &self,
        service_id: &str,
        revision: &Revision,
    ) -> Result<(), LiveSystemError> {
        self.delete(&format!("/controller-services/{}", service_id), Some(revision))
            .await
    }

    async fn set_controller_service_state(
        &self,
        service_id: &str,
        revision: &Revision,
        state: ControllerServiceState,
    ) -> Result<LiveControllerService, LiveSystemError> {
        let body = json!({
            "revision": { "clientId": self.client_id, "version": revision.version },
            "state": state.as_str(),
            "disconnectedNodeAcknowledged": false,
        });
        let entity: ControllerServiceEntity = self
            .put(&format!("/controller-services/{}/run-status", service_id), &body)
            .await?;
        entity.into_domain()
    }

    async fn create_drop_request(
        &self,
        connection_id: &str,
    ) -> Result<DropRequestStatus, LiveSystemError> {
        let entity: DropRequestEntity = self
            .post(
                &format!("/flowfile-queues/{}/drop-requests", connection_id),
                &Value::Null,
            )
            .await?;
        Ok(entity.into_domain(connection_id))
    }

    async fn get_drop_request(
        &self,
        connection_id: &str,
        request_id: &str,
    ) -> Result<DropRequestStatus, LiveSystemError> {
        let entity: DropRequestEntity = self
            .get(&format!(
                "/flowfile-queues/{}/drop-requests/{}",
                connection_id, request_id
            ))
            .await?;
        Ok(entity.into_domain(connection_id))
    }

    async fn delete_drop_request(
        &self,
        connection_id: &str,
        request_id: &str,
    ) -> Result<(), LiveSystemError> {
        self.delete(
            &format!("/flowfile-queues/{}/drop-requests/{}", connection_id, request_id),
            None,
        )
        .await
    }
}

#[async_trait]
impl TypeMetadataProvider for NifiClient {
    async fn processor_schema(&self, processor_type: &str) -> Result<TypeSchema, LiveSystemError> {
        let types: DocumentedTypesEntity = self
            .get_with_query("/flow/processor-types", &[("type", processor_type)])
            .await?;
        let bundle = types
            .processor_types
            .into_iter()
            .find(|t| t.type_name == processor_type)
            .map(|t| t.bundle.into())
            .ok_or_else(|| {
                LiveSystemError::NotFound(format!("processor type {}", processor_type))
            })?;
        self.definition("processor", processor_type, &bundle).await
    }

    async fn service_implementations(
        &self,
        api_type: &str,
        api_bundle: Option<&Bundle>,
    ) -> Result<Vec<ServiceImplementation>, LiveSystemError> {
        let mut query = vec![("serviceType", api_type)];
        if let Some(bundle) = api_bundle {
            query.push(("serviceBundleGroup", bundle.group.as_str()));
            query.push(("serviceBundleArtifact", bundle.artifact.as_str()));
            query.push(("serviceBundleVersion", bundle.version.as_str()));
        }
        let types: DocumentedTypesEntity = self
            .get_with_query("/flow/controller-service-types", &query)
            .await?;

        let mut implementations: Vec<ServiceImplementation> = types
            .controller_service_types
            .into_iter()
            .map(|t| ServiceImplementation {
                service_type: t.type_name,
                bundle: t.bundle.into(),
            })
            .collect();
        implementations.sort_by(|a, b| {
            (&a.bundle.group, &a.bundle.artifact, &a.service_type).cmp(&(
                &b.bundle.group,
                &b.bundle.artifact,
                &b.service_type,
            ))
        });
        Ok(implementations)
    }

    async fn service_schema(
        &self,
        service_type: &str,
        bundle: &Bundle,
    ) -> Result<TypeSchema, LiveSystemError> {
        self.definition("controller-service", service_type, bundle).await
    }
}

// ============================================================================
// Wire DTOs
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevisionDto {
    #[serde(default)]
    version: i64,
    #[serde(default)]
    client_id: Option<String>,
}

impl From<RevisionDto> for Revision {
    fn from(dto: RevisionDto) -> Self {
        Revision {
            version: dto.version,
            client_id: dto.client_id,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct PositionDto {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

impl From<Option<PositionDto>> for Position {
    fn from(dto: Option<PositionDto>) -> Self {
        let dto = dto.unwrap_or_default();
        Position::new(dto.x, dto.y)
    }
}

#[derive(Debug, Deserialize)]
struct BundleDto {
    group: String,
    artifact: String,
    version: String,
}

impl From<BundleDto> for Bundle {
    fn from(dto: BundleDto) -> Self {
        Bundle {
            group: dto.group,
            artifact: dto.artifact,
            version: dto.version,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessGroupComponent {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    parent_group_id: Option<String>,
    #[serde(default)]
    position: Option<PositionDto>,
}

#[derive(Debug, Deserialize)]
struct ProcessGroupEntity {
    #[serde(default)]
    revision: RevisionDto,
    component: ProcessGroupComponent,
}

impl ProcessGroupEntity {
    fn into_domain(self) -> LiveProcessGroup {
        LiveProcessGroup {
            id: self.component.id,
            name: self.component.name,
            parent_group_id: self.component.parent_group_id,
            position: self.component.position.into(),
            revision: self.revision.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessorComponent {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    processor_type: String,
    #[serde(default)]
    parent_group_id: Option<String>,
    #[serde(default)]
    position: Option<PositionDto>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProcessorEntity {
    #[serde(default)]
    revision: RevisionDto,
    component: ProcessorComponent,
}

impl ProcessorEntity {
    fn into_domain(self, fallback_group: &str) -> LiveProcessor {
        LiveProcessor {
            id: self.component.id,
            group_id: self
                .component
                .parent_group_id
                .unwrap_or_else(|| fallback_group.to_string()),
            name: self.component.name,
            processor_type: self.component.processor_type,
            position: self.component.position.into(),
            state: self.component.state.unwrap_or_default(),
            revision: self.revision.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortComponent {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    parent_group_id: Option<String>,
    #[serde(default)]
    position: Option<PositionDto>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PortEntity {
    #[serde(default)]
    revision: RevisionDto,
    component: PortComponent,
}

impl PortEntity {
    fn into_domain(self, kind: ConnectableKind, fallback_group: &str) -> LivePort {
        LivePort {
            id: self.component.id,
            group_id: self
                .component
                .parent_group_id
                .unwrap_or_else(|| fallback_group.to_string()),
            name: self.component.name,
            kind,
            position: self.component.position.into(),
            state: self.component.state.unwrap_or_default(),
            revision: self.revision.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectableDto {
    id: String,
    group_id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
}

impl ConnectableDto {
    fn into_domain(self) -> Result<ConnectableRef, LiveSystemError> {
        let kind = ConnectableKind::parse(&self.kind).ok_or_else(|| {
            LiveSystemError::Decode(format!("unsupported connectable type {}", self.kind))
        })?;
        Ok(ConnectableRef {
            id: self.id,
            group_id: self.group_id,
            kind,
            name: self.name,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionComponent {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parent_group_id: Option<String>,
    source: ConnectableDto,
    destination: ConnectableDto,
    #[serde(default)]
    selected_relationships: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ConnectionEntity {
    #[serde(default)]
    revision: RevisionDto,
    component: ConnectionComponent,
}

impl ConnectionEntity {
    fn into_domain(self, fallback_group: &str) -> Result<LiveConnection, LiveSystemError> {
        let component = self.component;
        Ok(LiveConnection {
            id: component.id,
            group_id: component
                .parent_group_id
                .unwrap_or_else(|| fallback_group.to_string()),
            name: component.name.unwrap_or_default(),
            source: component.source.into_domain()?,
            destination: component.destination.into_domain()?,
            relationships: component.selected_relationships.unwrap_or_default(),
            revision: self.revision.into(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowDto {
    #[serde(default)]
    process_groups: Vec<ProcessGroupEntity>,
    #[serde(default)]
    processors: Vec<ProcessorEntity>,
    #[serde(default)]
    input_ports: Vec<PortEntity>,
    #[serde(default)]
    output_ports: Vec<PortEntity>,
    #[serde(default)]
    connections: Vec<ConnectionEntity>,
}

#[derive(Debug, Deserialize)]
struct BreadcrumbDto {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct BreadcrumbEntity {
    #[serde(default)]
    breadcrumb: Option<BreadcrumbDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessGroupFlowDto {
    id: String,
    #[serde(default)]
    parent_group_id: Option<String>,
    #[serde(default)]
    breadcrumb: Option<BreadcrumbEntity>,
    #[serde(default)]
    flow: FlowDto,
}

impl ProcessGroupFlowDto {
    fn into_domain(self) -> Result<GroupFlow, LiveSystemError> {
        let id = self.id;
        let name = self
            .breadcrumb
            .and_then(|b| b.breadcrumb)
            .map(|b| b.name)
            .unwrap_or_default();
        let flow = self.flow;

        Ok(GroupFlow {
            group: LiveProcessGroup {
                id: id.clone(),
                name,
                parent_group_id: self.parent_group_id,
                position: Position::new(0.0, 0.0),
                revision: Revision::default(),
            },
            processors: flow.processors.into_iter().map(|p| p.into_domain(&id)).collect(),
            input_ports: flow
                .input_ports
                .into_iter()
                .map(|p| p.into_domain(ConnectableKind::InputPort, &id))
                .collect(),
            output_ports: flow
                .output_ports
                .into_iter()
                .map(|p| p.into_domain(ConnectableKind::OutputPort, &id))
                .collect(),
            connections: flow
                .connections
                .into_iter()
                .map(|c| c.into_domain(&id))
                .collect::<Result<_, _>>()?,
            child_groups: flow.process_groups.into_iter().map(|g| g.into_domain()).collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessGroupFlowEntity {
    process_group_flow: ProcessGroupFlowDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControllerServiceComponent {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    service_type: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    parent_group_id: Option<String>,
    /// Unset descriptors come back as `null`
    #[serde(default)]
    properties: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Deserialize)]
struct ControllerServiceEntity {
    #[serde(default)]
    revision: RevisionDto,
    component: ControllerServiceComponent,
}

impl ControllerServiceEntity {
    fn into_domain(self) -> Result<LiveControllerService, LiveSystemError> {
        let component = self.component;
        let state = ControllerServiceState::parse(&component.state).ok_or_else(|| {
            LiveSystemError::Decode(format!(
                "controller service {} has unknown state '{}'",
                component.id, component.state
            ))
        })?;
        Ok(LiveControllerService {
            id: component.id,
            group_id: component.parent_group_id.unwrap_or_default(),
            name: component.name,
            service_type: component.service_type,
            state,
            properties: component
                .properties
                .into_iter()
                .filter_map(|(k, v)| Some((k, v?)))
                .collect(),
            revision: self.revision.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControllerServicesEntity {
    #[serde(default)]
    controller_services: Vec<ControllerServiceEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DropRequestDto {
    id: String,
    #[serde(default)]
    finished: bool,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DropRequestEntity {
    drop_request: DropRequestDto,
}

impl DropRequestEntity {
    fn into_domain(self, connection_id: &str) -> DropRequestStatus {
        DropRequestStatus {
            id: self.drop_request.id,
            connection_id: connection_id.to_string(),
            finished: self.drop_request.finished,
            failure_reason: self.drop_request.failure_reason,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DocumentedTypeDto {
    #[serde(rename = "type")]
    type_name: String,
    bundle: BundleDto,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentedTypesEntity {
    #[serde(default)]
    processor_types: Vec<DocumentedTypeDto>,
    #[serde(default)]
    controller_service_types: Vec<DocumentedTypeDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinedTypeDto {
    #[serde(rename = "type")]
    type_name: String,
    group: String,
    artifact: String,
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllowableValueDto {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    /// Older DTOs wrap the value in an `allowableValue` object
    #[serde(default)]
    allowable_value: Option<Box<AllowableValueDto>>,
}

impl AllowableValueDto {
    fn into_domain(self) -> Option<AllowableValue> {
        if let Some(inner) = self.allowable_value {
            return inner.into_domain();
        }
        let value = self.value.or_else(|| self.display_name.clone())?;
        Some(AllowableValue {
            display_name: self.display_name.unwrap_or_else(|| value.clone()),
            value,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyDescriptorDto {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default_value: Option<String>,
    #[serde(default)]
    sensitive: bool,
    #[serde(default)]
    allowable_values: Option<Vec<AllowableValueDto>>,
    #[serde(default)]
    type_provided_by_value: Option<DefinedTypeDto>,
    #[serde(default)]
    identifies_controller_service: Option<String>,
    #[serde(default)]
    identifies_controller_service_bundle: Option<BundleDto>,
}

#[derive(Debug, Deserialize)]
struct RelationshipDto {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentDefinitionDto {
    #[serde(default)]
    property_descriptors: BTreeMap<String, PropertyDescriptorDto>,
    #[serde(default)]
    supported_relationships: Vec<RelationshipDto>,
    #[serde(default)]
    supports_dynamic_properties: bool,
    #[serde(default)]
    supports_dynamic_relationships: bool,
}

impl ComponentDefinitionDto {
    fn into_schema(self, component_type: &str, bundle: Bundle) -> TypeSchema {
        let property_descriptors = self
            .property_descriptors
            .into_iter()
            .map(|(key, d)| {
                let name = d.name.unwrap_or(key);
                let (service, service_bundle) = match (d.type_provided_by_value, d.identifies_controller_service) {
                    (Some(provided), _) => (
                        Some(provided.type_name),
                        Some(Bundle {
                            group: provided.group,
                            artifact: provided.artifact,
                            version: provided.version,
                        }),
                    ),
                    (None, Some(api)) => (Some(api), d.identifies_controller_service_bundle.map(Into::into)),
                    (None, None) => (None, None),
                };
                PropertyDescriptor {
                    display_name: d.display_name.unwrap_or_else(|| name.clone()),
                    name,
                    required: d.required,
                    default_value: d.default_value,
                    sensitive: d.sensitive,
                    allowable_values: d
                        .allowable_values
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(AllowableValueDto::into_domain)
                        .collect(),
                    identifies_controller_service: service,
                    identifies_controller_service_bundle: service_bundle,
                }
            })
            .collect();

        TypeSchema {
            component_type: component_type.to_string(),
            bundle,
            property_descriptors,
            relationships: self
                .supported_relationships
                .into_iter()
                .map(|r| RelationshipDescriptor {
                    name: r.name,
                    description: r.description,
                })
                .collect(),
            supports_dynamic_properties: self.supports_dynamic_properties,
            supports_dynamic_relationships: self.supports_dynamic_relationships,
        }
    }
}
