//! In-process controller
//!
//! Serves the part of the controller REST API the driver uses, plus the
//! ScaleIO gateway lookups, over plain HTTP on an ephemeral port. Mutations
//! apply immediately; tasks stay `pending` until polled.

use crate::client::ControllerClient;
use crate::config::{DriverConfig, ScaleIoGatewayConfig, Scheme};
use crate::domain::model::{
    BulkIdParam, ConsistencyGroup, ConsistencyGroupCreateParam, ConsistencyGroupUpdateParam,
    ExportCreateParam, ExportGroup, ExportGroupType, ExportUpdateParam, ExportVolume, FullCopyParam,
    Host, HostCreateParam, Initiator, InitiatorCreateParam, InitiatorProtocol, Itl, ItlInitiator,
    ItlTarget, NamedRelatedResource, Project, SearchResult, SearchResults, Snapshot,
    SnapshotCreateParam, TagChanges, Task, TaskState, Tenant, VirtualArray, VirtualPool, Volume,
    VolumeCreateParam, VolumeExpandParam, VpoolCapacity, VpoolChangeParam,
};
use crate::export::normalize_port;
use crate::scaleio::GatewayAuth;
use crate::transport::http::TOKEN_HEADER;
use crate::transport::Session;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const USERNAME: &str = "root";
const PASSWORD: &str = "secret";
const SIO_USERNAME: &str = "admin";
const SIO_PASSWORD: &str = "sio-secret";

const GIB: f64 = (1u64 << 30) as f64;

const DEFAULT_CAPACITY: VpoolCapacity = VpoolCapacity {
    free_gb: 1024.0,
    used_gb: 512.0,
    provisioned_gb: 256.0,
};

type Shared = Arc<Mutex<Store>>;

// =============================================================================
// State
// =============================================================================

struct MockTask {
    task: Task,
    remaining: u32,
    failure: Option<String>,
}

struct Store {
    next_id: u64,
    token: Option<String>,
    stale_reply: (StatusCode, String),
    requests: Vec<(String, String)>,
    tenant: Tenant,
    project: Project,
    varray: VirtualArray,
    storage_system: NamedRelatedResource,
    vpools: Vec<NamedRelatedResource>,
    capacity: HashMap<String, VpoolCapacity>,
    volumes: Vec<Volume>,
    snapshots: Vec<Snapshot>,
    groups: Vec<ConsistencyGroup>,
    hosts: Vec<Host>,
    initiators: Vec<Initiator>,
    exports: Vec<ExportGroup>,
    tasks: Vec<MockTask>,
    task_delay: u32,
    hold_tasks: bool,
    fail_next: Option<String>,
    itl_delay: u32,
    unassigned_ports: Vec<String>,
    vanished_exports: Vec<String>,
    targets: Vec<ItlTarget>,
    sio_version: String,
    sio_token: Option<String>,
    sdcs: HashMap<String, String>,
}

impl Store {
    fn new() -> Self {
        let tenant = Tenant {
            id: "urn:storageos:TenantOrg:root:global".into(),
            name: "T".into(),
            inactive: false,
        };
        Self {
            next_id: 0,
            token: None,
            stale_reply: (StatusCode::UNAUTHORIZED, "authentication required".into()),
            requests: Vec::new(),
            project: Project {
                id: "urn:storageos:Project:p1:global".into(),
                name: "P".into(),
                tenant: Some(NamedRelatedResource::new(&tenant.id, &tenant.name)),
                inactive: false,
            },
            tenant,
            varray: VirtualArray {
                id: "urn:storageos:VirtualArray:va1:vdc1".into(),
                name: "VA".into(),
                inactive: false,
            },
            storage_system: NamedRelatedResource::new("urn:storageos:StorageSystem:ss1:vdc1", "VNX1"),
            vpools: Vec::new(),
            capacity: HashMap::new(),
            volumes: Vec::new(),
            snapshots: Vec::new(),
            groups: Vec::new(),
            hosts: Vec::new(),
            initiators: Vec::new(),
            exports: Vec::new(),
            tasks: Vec::new(),
            task_delay: 0,
            hold_tasks: false,
            fail_next: None,
            itl_delay: 0,
            unassigned_ports: Vec::new(),
            vanished_exports: Vec::new(),
            targets: vec![ItlTarget {
                id: Some("urn:storageos:StoragePort:sp1:vdc1".into()),
                port: "iqn.1992-04.com.emc:cx.apm00123.a0".into(),
                ip_address: Some("10.0.0.9".into()),
                tcp_port: Some(3260),
            }],
            sio_version: "2.0.13000.211".into(),
            sio_token: None,
            sdcs: HashMap::new(),
        }
    }

    fn new_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("urn:storageos:{}:{}:vdc1", kind, self.next_id)
    }

    fn project_ref(&self) -> NamedRelatedResource {
        NamedRelatedResource::new(&self.project.id, &self.project.name)
    }

    fn varray_ref(&self) -> NamedRelatedResource {
        NamedRelatedResource::new(&self.varray.id, &self.varray.name)
    }

    fn ensure_vpool(&mut self, name: &str) -> NamedRelatedResource {
        if let Some(vpool) = self.vpools.iter().find(|v| v.name.as_deref() == Some(name)) {
            return vpool.clone();
        }
        let vpool = NamedRelatedResource::new(self.new_id("VirtualPool"), name);
        self.vpools.push(vpool.clone());
        vpool
    }

    // -------------------------------------------------------------------------
    // Tasks
    // -------------------------------------------------------------------------

    fn new_task(&mut self, resource: NamedRelatedResource, description: &str) -> Task {
        self.next_id += 1;
        let task = Task {
            op_id: format!("op-{}", self.next_id),
            resource,
            state: TaskState::Pending,
            message: None,
            description: Some(description.to_string()),
            inactive: false,
        };
        let failure = self.fail_next.take();
        self.tasks.push(MockTask {
            task: task.clone(),
            remaining: self.task_delay,
            failure,
        });
        task
    }

    fn finished_task(&mut self, resource: NamedRelatedResource, description: &str) {
        self.next_id += 1;
        self.tasks.push(MockTask {
            task: Task {
                op_id: format!("op-{}", self.next_id),
                resource,
                state: TaskState::Ready,
                message: None,
                description: Some(description.to_string()),
                inactive: true,
            },
            remaining: 0,
            failure: None,
        });
    }

    fn poll_task(&mut self, resource_id: &str, op_id: &str) -> Option<Task> {
        let hold = self.hold_tasks;
        let record = self
            .tasks
            .iter_mut()
            .find(|t| t.task.resource.id == resource_id && t.task.op_id == op_id)?;
        if !record.task.state.is_terminal() && !hold {
            if record.remaining > 0 {
                record.remaining -= 1;
            } else {
                match record.failure.take() {
                    Some(message) => {
                        record.task.state = TaskState::Error;
                        record.task.message = Some(message);
                    }
                    None => record.task.state = TaskState::Ready,
                }
                record.task.inactive = true;
            }
        }
        Some(record.task.clone())
    }

    // -------------------------------------------------------------------------
    // Volumes
    // -------------------------------------------------------------------------

    fn volume_mut(&mut self, id: &str) -> Option<&mut Volume> {
        self.volumes.iter_mut().find(|v| v.id == id)
    }

    fn active_volume(&self, id: &str) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.id == id && !v.inactive)
    }

    fn name_taken(&self, name: &str) -> bool {
        self.volumes.iter().any(|v| v.name == name && !v.inactive)
    }

    fn insert_volume(
        &mut self,
        name: &str,
        size_gb: f64,
        vpool: NamedRelatedResource,
        consistency_group: Option<String>,
    ) -> Volume {
        let id = self.new_id("Volume");
        let volume = Volume {
            id: id.clone(),
            name: name.to_string(),
            inactive: false,
            provisioned_capacity_gb: size_gb,
            allocated_capacity_gb: 0.0,
            vpool: Some(vpool),
            varray: Some(self.varray_ref()),
            project: Some(self.project_ref()),
            consistency_group: None,
            protocols: vec!["iSCSI".into(), "FC".into()],
            wwn: Some(format!("60060160{:024x}", self.next_id)),
            tags: Vec::new(),
        };
        self.volumes.push(volume.clone());
        if let Some(group_id) = consistency_group {
            self.join_group(&group_id, &id);
        }
        self.volumes.iter().find(|v| v.id == id).cloned().unwrap_or(volume)
    }

    fn deactivate_volume(&mut self, id: &str) -> Option<Task> {
        let volume = self.volume_mut(id)?;
        volume.inactive = true;
        let group = volume.consistency_group.take();
        let resource = NamedRelatedResource::new(&volume.id, &volume.name);
        if let Some(group) = group {
            if let Some(cg) = self.groups.iter_mut().find(|g| g.id == group.id) {
                cg.volumes.retain(|v| v.id != id);
            }
        }
        Some(self.new_task(resource, "DELETE VOLUME"))
    }

    fn join_group(&mut self, group_id: &str, volume_id: &str) {
        let Some(group) = self.groups.iter_mut().find(|g| g.id == group_id) else {
            return;
        };
        let group_ref = NamedRelatedResource::new(&group.id, &group.name);
        if let Some(volume) = self.volumes.iter_mut().find(|v| v.id == volume_id) {
            if !group.volumes.iter().any(|v| v.id == volume_id) {
                group.volumes.push(NamedRelatedResource::new(&volume.id, &volume.name));
            }
            volume.consistency_group = Some(group_ref);
        }
    }

    fn leave_group(&mut self, group_id: &str, volume_id: &str) {
        if let Some(group) = self.groups.iter_mut().find(|g| g.id == group_id) {
            group.volumes.retain(|v| v.id != volume_id);
        }
        if let Some(volume) = self.volume_mut(volume_id) {
            volume.consistency_group = None;
        }
    }

    fn insert_snapshot(&mut self, volume_id: &str, name: &str, group: Option<NamedRelatedResource>) -> Option<Task> {
        let parent = self
            .active_volume(volume_id)
            .map(|v| NamedRelatedResource::new(&v.id, &v.name))?;
        let id = self.new_id("BlockSnapshot");
        self.snapshots.push(Snapshot {
            id: id.clone(),
            name: name.to_string(),
            inactive: false,
            parent: Some(parent),
            consistency_group: group,
        });
        Some(self.new_task(NamedRelatedResource::new(id, name), "CREATE SNAPSHOT"))
    }

    fn deactivate_snapshot(&mut self, id: &str) -> Option<Task> {
        let snapshot = self.snapshots.iter_mut().find(|s| s.id == id)?;
        snapshot.inactive = true;
        let resource = NamedRelatedResource::new(&snapshot.id, &snapshot.name);
        Some(self.new_task(resource, "DELETE SNAPSHOT"))
    }

    // -------------------------------------------------------------------------
    // Exports
    // -------------------------------------------------------------------------

    fn host_initiators(&self, host_id: &str) -> Vec<Initiator> {
        self.initiators
            .iter()
            .filter(|i| !i.inactive && i.host.as_ref().map(|h| h.id == host_id).unwrap_or(false))
            .cloned()
            .collect()
    }

    fn insert_initiator(&mut self, host_id: &str, protocol: InitiatorProtocol, port: &str, node: Option<String>) -> Initiator {
        let host = self
            .hosts
            .iter()
            .find(|h| h.id == host_id)
            .map(|h| NamedRelatedResource::new(&h.id, &h.name));
        let initiator = Initiator {
            id: self.new_id("Initiator"),
            initiator_port: port.to_string(),
            initiator_node: node,
            protocol: Some(protocol.to_string()),
            host,
            inactive: false,
        };
        self.initiators.push(initiator.clone());
        // Host export groups follow their hosts' initiators
        for group in self.exports.iter_mut().filter(|g| g.hosts.iter().any(|h| h.id == host_id)) {
            group.initiators.push(initiator.clone());
        }
        initiator
    }

    fn itls<F>(&self, include: F) -> Vec<Itl>
    where
        F: Fn(&ExportGroup, &ExportVolume) -> bool,
    {
        let mut itls = Vec::new();
        for group in self.exports.iter().filter(|g| !g.inactive) {
            for volume in group.volumes.iter().filter(|v| include(group, v)) {
                for initiator in &group.initiators {
                    let unassigned = self
                        .unassigned_ports
                        .contains(&normalize_port(&initiator.initiator_port));
                    for target in &self.targets {
                        itls.push(Itl {
                            hlu: if unassigned { -1 } else { volume.lun.unwrap_or(0) },
                            initiator: ItlInitiator {
                                id: Some(initiator.id.clone()),
                                port: Some(initiator.initiator_port.clone()),
                            },
                            target: target.clone(),
                            export: Some(NamedRelatedResource::new(&group.id, &group.name)),
                        });
                    }
                }
            }
        }
        itls
    }
}

fn add_export_volume(group: &mut ExportGroup, volume_id: &str) {
    if group.has_volume(volume_id) {
        return;
    }
    let lun = group.volumes.iter().filter_map(|v| v.lun).max().unwrap_or(0) + 1;
    group.volumes.push(ExportVolume {
        id: volume_id.to_string(),
        lun: Some(lun),
    });
}

// =============================================================================
// Replies
// =============================================================================

fn reply<T: Serialize>(value: T) -> Response {
    Json(value).into_response()
}

fn tasks_reply(tasks: Vec<Task>) -> Response {
    reply(json!({ "task": tasks }))
}

fn error_reply(status: StatusCode, details: impl Into<String>) -> Response {
    let details = details.into();
    (status, Json(json!({"code": status.as_u16(), "details": details}))).into_response()
}

fn missing(kind: &str, id: &str) -> Response {
    error_reply(StatusCode::NOT_FOUND, format!("{} {} not found", kind, id))
}

fn conflict(kind: &str, name: &str) -> Response {
    error_reply(
        StatusCode::BAD_REQUEST,
        format!("{} with name {} already exists", kind, name),
    )
}

fn named(items: impl Iterator<Item = (String, String)>) -> Vec<NamedRelatedResource> {
    items.map(|(id, name)| NamedRelatedResource::new(id, name)).collect()
}

/// Header value reqwest sends for basic authentication
fn basic_auth(user: &str, secret: &str) -> Option<String> {
    let request = reqwest::Client::new()
        .get("http://mock.invalid/")
        .basic_auth(user, Some(secret))
        .build()
        .ok()?;
    request
        .headers()
        .get(reqwest::header::AUTHORIZATION)?
        .to_str()
        .ok()
        .map(str::to_string)
}

fn basic_matches(headers: &HeaderMap, user: &str, secret: &str) -> bool {
    let presented = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    presented.is_some() && presented.map(str::to_string) == basic_auth(user, secret)
}

// =============================================================================
// Session
// =============================================================================

async fn gate(State(state): State<Shared>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let rejection = {
        let mut store = state.lock();
        store.requests.push((request.method().to_string(), path.clone()));
        let open = path == "/login" || path.starts_with("/api/");
        let authorized = open
            || request
                .headers()
                .get(TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|token| store.token.as_deref() == Some(token))
                .unwrap_or(false);
        (!authorized).then(|| store.stale_reply.clone())
    };
    if let Some((status, details)) = rejection {
        return error_reply(status, details);
    }
    next.run(request).await
}

async fn login(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !basic_matches(&headers, USERNAME, PASSWORD) {
        return error_reply(StatusCode::UNAUTHORIZED, "bad credentials");
    }
    let token = {
        let mut store = state.lock();
        store.next_id += 1;
        let token = format!("token-{}", store.next_id);
        store.token = Some(token.clone());
        token
    };
    (StatusCode::OK, [("x-sds-auth-token", token)]).into_response()
}

async fn logout(State(state): State<Shared>) -> Response {
    state.lock().token = None;
    reply(json!({}))
}

// =============================================================================
// Tenancy and Catalog
// =============================================================================

async fn current_tenant(State(state): State<Shared>) -> Response {
    reply(&state.lock().tenant)
}

async fn show_tenant(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    if store.tenant.id == id {
        reply(&store.tenant)
    } else {
        missing("tenant", &id)
    }
}

async fn subtenants() -> Response {
    reply(json!({ "subtenant": [] }))
}

async fn tenant_projects(State(state): State<Shared>) -> Response {
    let store = state.lock();
    reply(json!({ "project": [store.project_ref()] }))
}

async fn show_project(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    if store.project.id == id {
        reply(&store.project)
    } else {
        missing("project", &id)
    }
}

async fn project_resources(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    if store.project.id != id {
        return missing("project", &id);
    }
    let mut resources = Vec::new();
    for v in store.volumes.iter().filter(|v| !v.inactive) {
        resources.push(json!({"id": v.id, "name": v.name, "resource_type": "volume"}));
    }
    for g in store.groups.iter().filter(|g| !g.inactive) {
        resources.push(json!({"id": g.id, "name": g.name, "resource_type": "block_consistency_group"}));
    }
    for e in store.exports.iter().filter(|e| !e.inactive) {
        resources.push(json!({"id": e.id, "name": e.name, "resource_type": "block_export"}));
    }
    reply(json!({ "project_resource": resources }))
}

async fn list_varrays(State(state): State<Shared>) -> Response {
    reply(json!({ "varray": [state.lock().varray_ref()] }))
}

async fn show_varray(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    if store.varray.id == id {
        reply(&store.varray)
    } else {
        missing("varray", &id)
    }
}

async fn list_storage_systems(State(state): State<Shared>) -> Response {
    reply(json!({ "storage_system": [state.lock().storage_system.clone()] }))
}

async fn show_storage_system(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    if store.storage_system.id != id {
        return missing("storage system", &id);
    }
    reply(json!({
        "id": store.storage_system.id,
        "name": store.storage_system.name,
        "system_type": "vnxblock",
        "serial_number": "APM00123",
        "registration_status": "REGISTERED"
    }))
}

async fn list_vpools(State(state): State<Shared>) -> Response {
    reply(json!({ "virtualpool": state.lock().vpools }))
}

async fn show_vpool(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    match store.vpools.iter().find(|v| v.id == id) {
        Some(vpool) => reply(VirtualPool {
            id: vpool.id.clone(),
            name: vpool.name.clone().unwrap_or_default(),
            inactive: false,
            pool_type: Some("block".into()),
            protocols: vec!["iSCSI".into(), "FC".into(), "ScaleIO".into()],
            provisioning_type: Some("Thin".into()),
            protection: None,
        }),
        None => missing("vpool", &id),
    }
}

async fn vpool_capacity(State(state): State<Shared>, Path((vpool, varray)): Path<(String, String)>) -> Response {
    let store = state.lock();
    if !store.vpools.iter().any(|v| v.id == vpool) || store.varray.id != varray {
        return missing("vpool capacity", &vpool);
    }
    reply(store.capacity.get(&vpool).copied().unwrap_or(DEFAULT_CAPACITY))
}

// =============================================================================
// Volumes
// =============================================================================

async fn create_volume(State(state): State<Shared>, Json(param): Json<VolumeCreateParam>) -> Response {
    let mut store = state.lock();
    let Some(vpool) = store.vpools.iter().find(|v| v.id == param.vpool).cloned() else {
        return error_reply(StatusCode::BAD_REQUEST, format!("unknown vpool {}", param.vpool));
    };
    let Ok(bytes) = param.size.parse::<u64>() else {
        return error_reply(StatusCode::BAD_REQUEST, format!("invalid size {}", param.size));
    };
    if store.name_taken(&param.name) {
        return conflict("Volume", &param.name);
    }
    let volume = store.insert_volume(&param.name, bytes as f64 / GIB, vpool, param.consistency_group.clone());
    let task = store.new_task(NamedRelatedResource::new(&volume.id, &volume.name), "CREATE VOLUME");
    tasks_reply(vec![task])
}

async fn search_volumes(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    let store = state.lock();
    let project = query.get("project").cloned().unwrap_or_default();
    let resource = store
        .volumes
        .iter()
        .filter(|v| v.project.as_ref().map(|p| p.id == project).unwrap_or(false))
        .map(|v| SearchResult {
            id: v.id.clone(),
            matched: Some(v.name.clone()),
        })
        .collect();
    reply(SearchResults { resource })
}

async fn show_volume(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    match store.volumes.iter().find(|v| v.id == id) {
        Some(volume) => reply(volume),
        None => missing("volume", &id),
    }
}

async fn deactivate_volume(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut store = state.lock();
    match store.deactivate_volume(&id) {
        Some(task) => reply(task),
        None => missing("volume", &id),
    }
}

async fn deactivate_volumes(State(state): State<Shared>, Json(param): Json<BulkIdParam>) -> Response {
    let mut store = state.lock();
    let mut tasks = Vec::new();
    for id in &param.id {
        match store.deactivate_volume(id) {
            Some(task) => tasks.push(task),
            None => return missing("volume", id),
        }
    }
    tasks_reply(tasks)
}

async fn expand_volume(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(param): Json<VolumeExpandParam>,
) -> Response {
    let mut store = state.lock();
    let Ok(bytes) = param.new_size.parse::<u64>() else {
        return error_reply(StatusCode::BAD_REQUEST, format!("invalid size {}", param.new_size));
    };
    let Some(volume) = store.volume_mut(&id).filter(|v| !v.inactive) else {
        return missing("volume", &id);
    };
    volume.provisioned_capacity_gb = bytes as f64 / GIB;
    let resource = NamedRelatedResource::new(&volume.id, &volume.name);
    reply(store.new_task(resource, "EXPAND VOLUME"))
}

async fn volume_exports(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut store = state.lock();
    if !store.volumes.iter().any(|v| v.id == id) {
        return missing("volume", &id);
    }
    if store.itl_delay > 0 {
        store.itl_delay -= 1;
        return reply(json!({ "itl": [] }));
    }
    reply(json!({ "itl": store.itls(|_, v| v.id == id) }))
}

async fn volume_tags(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    match store.volumes.iter().find(|v| v.id == id) {
        Some(volume) => reply(json!({ "tag": volume.tags })),
        None => missing("volume", &id),
    }
}

async fn update_volume_tags(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(changes): Json<TagChanges>,
) -> Response {
    let mut store = state.lock();
    let Some(volume) = store.volume_mut(&id) else {
        return missing("volume", &id);
    };
    volume.tags.retain(|t| !changes.remove.contains(t));
    for tag in changes.add {
        if !volume.tags.contains(&tag) {
            volume.tags.push(tag);
        }
    }
    reply(json!({ "tag": volume.tags }))
}

async fn resource_tasks(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    let tasks: Vec<Task> = store
        .tasks
        .iter()
        .filter(|t| t.task.resource.id == id)
        .map(|t| t.task.clone())
        .collect();
    reply(json!({ "task": tasks }))
}

async fn task_status(State(state): State<Shared>, Path((id, op_id)): Path<(String, String)>) -> Response {
    let mut store = state.lock();
    match store.poll_task(&id, &op_id) {
        Some(task) => reply(task),
        None => missing("task", &op_id),
    }
}

async fn full_copy(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(param): Json<FullCopyParam>,
) -> Response {
    let mut store = state.lock();
    let Some(source) = store.active_volume(&id).cloned() else {
        return missing("volume", &id);
    };
    if store.name_taken(&param.name) {
        return conflict("Volume", &param.name);
    }
    let vpool = source.vpool.clone().unwrap_or_else(|| NamedRelatedResource::new("", ""));
    let copy = store.insert_volume(&param.name, source.provisioned_capacity_gb, vpool, None);
    let task = store.new_task(NamedRelatedResource::new(&copy.id, &copy.name), "CREATE VOLUME FULL COPY");
    tasks_reply(vec![task])
}

async fn detach_full_copy(State(state): State<Shared>, Path((id, copy_id)): Path<(String, String)>) -> Response {
    let mut store = state.lock();
    if store.active_volume(&id).is_none() {
        return missing("volume", &id);
    }
    let Some(copy) = store.active_volume(&copy_id).cloned() else {
        return missing("volume", &copy_id);
    };
    let task = store.new_task(NamedRelatedResource::new(&copy.id, &copy.name), "DETACH VOLUME FULL COPY");
    tasks_reply(vec![task])
}

async fn change_vpool(State(state): State<Shared>, Json(param): Json<VpoolChangeParam>) -> Response {
    let mut store = state.lock();
    let Some(vpool) = store.vpools.iter().find(|v| v.id == param.vpool).cloned() else {
        return error_reply(StatusCode::BAD_REQUEST, format!("unknown vpool {}", param.vpool));
    };
    let mut tasks = Vec::new();
    for id in &param.volumes {
        let Some(volume) = store.volume_mut(id).filter(|v| !v.inactive) else {
            return missing("volume", id);
        };
        volume.vpool = Some(vpool.clone());
        let resource = NamedRelatedResource::new(&volume.id, &volume.name);
        tasks.push(store.new_task(resource, "CHANGE VPOOL"));
    }
    tasks_reply(tasks)
}

// =============================================================================
// Snapshots
// =============================================================================

async fn volume_snapshots(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    let snapshots = named(
        store
            .snapshots
            .iter()
            .filter(|s| !s.inactive && s.parent.as_ref().map(|p| p.id == id).unwrap_or(false))
            .map(|s| (s.id.clone(), s.name.clone())),
    );
    reply(json!({ "snapshot": snapshots }))
}

async fn create_volume_snapshot(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(param): Json<SnapshotCreateParam>,
) -> Response {
    let mut store = state.lock();
    let duplicate = store.snapshots.iter().any(|s| {
        !s.inactive && s.name == param.name && s.parent.as_ref().map(|p| p.id == id).unwrap_or(false)
    });
    if duplicate {
        return conflict("Snapshot", &param.name);
    }
    match store.insert_snapshot(&id, &param.name, None) {
        Some(task) => tasks_reply(vec![task]),
        None => missing("volume", &id),
    }
}

async fn show_snapshot(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    match store.snapshots.iter().find(|s| s.id == id) {
        Some(snapshot) => reply(snapshot),
        None => missing("snapshot", &id),
    }
}

async fn deactivate_snapshot(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut store = state.lock();
    match store.deactivate_snapshot(&id) {
        Some(task) => tasks_reply(vec![task]),
        None => missing("snapshot", &id),
    }
}

async fn snapshot_full_copy(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(param): Json<FullCopyParam>,
) -> Response {
    let mut store = state.lock();
    let parent = store
        .snapshots
        .iter()
        .find(|s| s.id == id && !s.inactive)
        .and_then(|s| s.parent.clone());
    let Some(source) = parent.and_then(|p| store.volumes.iter().find(|v| v.id == p.id).cloned()) else {
        return missing("snapshot", &id);
    };
    if store.name_taken(&param.name) {
        return conflict("Volume", &param.name);
    }
    let vpool = source.vpool.clone().unwrap_or_else(|| NamedRelatedResource::new("", ""));
    let copy = store.insert_volume(&param.name, source.provisioned_capacity_gb, vpool, None);
    let task = store.new_task(NamedRelatedResource::new(&copy.id, &copy.name), "CREATE SNAPSHOT FULL COPY");
    tasks_reply(vec![task])
}

// =============================================================================
// Consistency Groups
// =============================================================================

async fn create_group(State(state): State<Shared>, Json(param): Json<ConsistencyGroupCreateParam>) -> Response {
    let mut store = state.lock();
    if store.groups.iter().any(|g| !g.inactive && g.name == param.name) {
        return conflict("Consistency group", &param.name);
    }
    let group = ConsistencyGroup {
        id: store.new_id("BlockConsistencyGroup"),
        name: param.name,
        inactive: false,
        volumes: Vec::new(),
        project: Some(store.project_ref()),
    };
    store.groups.push(group.clone());
    reply(group)
}

async fn show_group(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    match store.groups.iter().find(|g| g.id == id) {
        Some(group) => reply(group),
        None => missing("consistency group", &id),
    }
}

async fn update_group(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(param): Json<ConsistencyGroupUpdateParam>,
) -> Response {
    let mut store = state.lock();
    let Some(group) = store.groups.iter().find(|g| g.id == id && !g.inactive).cloned() else {
        return missing("consistency group", &id);
    };
    for volume in param.add_volumes.map(|l| l.volume).unwrap_or_default() {
        if store.active_volume(&volume).is_none() {
            return missing("volume", &volume);
        }
        store.join_group(&id, &volume);
    }
    for volume in param.remove_volumes.map(|l| l.volume).unwrap_or_default() {
        store.leave_group(&id, &volume);
    }
    let task = store.new_task(NamedRelatedResource::new(&group.id, &group.name), "UPDATE CONSISTENCY GROUP");
    reply(task)
}

async fn deactivate_group(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut store = state.lock();
    let Some(group) = store.groups.iter_mut().find(|g| g.id == id && !g.inactive) else {
        return missing("consistency group", &id);
    };
    group.inactive = true;
    let members: Vec<String> = group.volumes.drain(..).map(|v| v.id).collect();
    let resource = NamedRelatedResource::new(&group.id, &group.name);
    for member in members {
        if let Some(volume) = store.volume_mut(&member) {
            volume.consistency_group = None;
        }
    }
    reply(store.new_task(resource, "DELETE CONSISTENCY GROUP"))
}

async fn group_snapshots(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    let snapshots = named(
        store
            .snapshots
            .iter()
            .filter(|s| !s.inactive && s.consistency_group.as_ref().map(|g| g.id == id).unwrap_or(false))
            .map(|s| (s.id.clone(), s.name.clone())),
    );
    reply(json!({ "snapshot": snapshots }))
}

async fn create_group_snapshot(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(param): Json<SnapshotCreateParam>,
) -> Response {
    let mut store = state.lock();
    let Some(group) = store.groups.iter().find(|g| g.id == id && !g.inactive).cloned() else {
        return missing("consistency group", &id);
    };
    if group.volumes.is_empty() {
        return error_reply(StatusCode::BAD_REQUEST, format!("consistency group {} has no volumes", group.name));
    }
    let group_ref = NamedRelatedResource::new(&group.id, &group.name);
    let mut tasks = Vec::new();
    for member in &group.volumes {
        if let Some(task) = store.insert_snapshot(&member.id, &param.name, Some(group_ref.clone())) {
            tasks.push(task);
        }
    }
    tasks_reply(tasks)
}

async fn deactivate_group_snapshot(
    State(state): State<Shared>,
    Path((id, snapshot_id)): Path<(String, String)>,
) -> Response {
    let mut store = state.lock();
    let Some(name) = store
        .snapshots
        .iter()
        .find(|s| s.id == snapshot_id && s.consistency_group.as_ref().map(|g| g.id == id).unwrap_or(false))
        .map(|s| s.name.clone())
    else {
        return missing("snapshot", &snapshot_id);
    };
    // The whole snapshot set goes together
    let set: Vec<String> = store
        .snapshots
        .iter()
        .filter(|s| {
            !s.inactive && s.name == name && s.consistency_group.as_ref().map(|g| g.id == id).unwrap_or(false)
        })
        .map(|s| s.id.clone())
        .collect();
    let tasks = set.iter().filter_map(|sid| store.deactivate_snapshot(sid)).collect();
    tasks_reply(tasks)
}

// =============================================================================
// Hosts and Initiators
// =============================================================================

async fn list_hosts(State(state): State<Shared>) -> Response {
    let store = state.lock();
    let hosts = named(
        store
            .hosts
            .iter()
            .filter(|h| !h.inactive)
            .map(|h| (h.id.clone(), h.name.clone())),
    );
    reply(json!({ "host": hosts }))
}

async fn create_host(State(state): State<Shared>, Json(param): Json<HostCreateParam>) -> Response {
    let mut store = state.lock();
    if store.hosts.iter().any(|h| !h.inactive && h.name == param.name) {
        return conflict("Host", &param.name);
    }
    let host = Host {
        id: store.new_id("Host"),
        name: param.name,
        host_name: Some(param.host_name),
        host_type: Some(param.host_type),
        inactive: false,
    };
    store.hosts.push(host.clone());
    reply(store.new_task(NamedRelatedResource::new(&host.id, &host.name), "CREATE HOST"))
}

async fn show_host(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    match store.hosts.iter().find(|h| h.id == id) {
        Some(host) => reply(host),
        None => missing("host", &id),
    }
}

async fn list_host_initiators(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    let initiators = named(
        store
            .host_initiators(&id)
            .into_iter()
            .map(|i| (i.id, i.initiator_port)),
    );
    reply(json!({ "initiator": initiators }))
}

async fn create_initiator(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(param): Json<InitiatorCreateParam>,
) -> Response {
    let mut store = state.lock();
    if !store.hosts.iter().any(|h| h.id == id && !h.inactive) {
        return missing("host", &id);
    }
    let port = normalize_port(&param.initiator_port);
    if store
        .initiators
        .iter()
        .any(|i| !i.inactive && normalize_port(&i.initiator_port) == port)
    {
        return conflict("Initiator", &param.initiator_port);
    }
    let initiator = store.insert_initiator(&id, param.protocol, &param.initiator_port, param.initiator_node);
    reply(store.new_task(
        NamedRelatedResource::new(&initiator.id, &initiator.initiator_port),
        "ADD INITIATOR",
    ))
}

async fn host_exports(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    let ports: Vec<String> = store.host_initiators(&id).iter().map(|i| i.initiator_port.clone()).collect();
    let itls: Vec<Itl> = store
        .itls(|_, _| true)
        .into_iter()
        .filter(|itl| itl.initiator.port.as_ref().map(|p| ports.contains(p)).unwrap_or(false))
        .collect();
    reply(json!({ "itl": itls }))
}

async fn show_initiator(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    match store.initiators.iter().find(|i| i.id == id) {
        Some(initiator) => reply(initiator),
        None => missing("initiator", &id),
    }
}

async fn search_initiators(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    let store = state.lock();
    let port = query.get("initiator_port").map(|p| normalize_port(p)).unwrap_or_default();
    let resource = store
        .initiators
        .iter()
        .filter(|i| !i.inactive && normalize_port(&i.initiator_port) == port)
        .map(|i| SearchResult {
            id: i.id.clone(),
            matched: Some(i.initiator_port.clone()),
        })
        .collect();
    reply(SearchResults { resource })
}

// =============================================================================
// Export Groups
// =============================================================================

async fn create_export(State(state): State<Shared>, Json(param): Json<ExportCreateParam>) -> Response {
    let mut store = state.lock();
    if store.exports.iter().any(|e| !e.inactive && e.name == param.name) {
        return conflict("Export group", &param.name);
    }
    let mut hosts = Vec::new();
    let mut initiators = Vec::new();
    for host_id in &param.hosts {
        let Some(host) = store.hosts.iter().find(|h| &h.id == host_id && !h.inactive) else {
            return missing("host", host_id);
        };
        hosts.push(NamedRelatedResource::new(&host.id, &host.name));
        initiators.extend(store.host_initiators(host_id));
    }
    let mut group = ExportGroup {
        id: store.new_id("ExportGroup"),
        name: param.name,
        inactive: false,
        export_type: Some(param.export_type),
        volumes: Vec::new(),
        initiators,
        hosts,
        clusters: Vec::new(),
        varray: Some(store.varray_ref()),
        project: Some(store.project_ref()),
    };
    for volume in &param.volumes {
        add_export_volume(&mut group, &volume.id);
    }
    let resource = NamedRelatedResource::new(&group.id, &group.name);
    store.exports.push(group);
    reply(store.new_task(resource, "CREATE EXPORT GROUP"))
}

async fn search_exports(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    let store = state.lock();
    let project = query.get("project").cloned().unwrap_or_default();
    let resource = store
        .exports
        .iter()
        .filter(|e| !e.inactive && e.project.as_ref().map(|p| p.id == project).unwrap_or(false))
        .map(|e| SearchResult {
            id: e.id.clone(),
            matched: Some(e.name.clone()),
        })
        .collect();
    reply(SearchResults { resource })
}

async fn show_export(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let store = state.lock();
    if store.vanished_exports.contains(&id) {
        return missing("export group", &id);
    }
    match store.exports.iter().find(|e| e.id == id) {
        Some(group) => reply(group),
        None => missing("export group", &id),
    }
}

async fn update_export(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(param): Json<ExportUpdateParam>,
) -> Response {
    let mut store = state.lock();
    let added_initiators: Vec<Initiator> = param
        .initiator_changes
        .as_ref()
        .map(|c| {
            store
                .initiators
                .iter()
                .filter(|i| c.add.contains(&i.id))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    let Some(group) = store.exports.iter_mut().find(|e| e.id == id && !e.inactive) else {
        return missing("export group", &id);
    };
    if let Some(changes) = &param.volume_changes {
        for volume in &changes.add {
            add_export_volume(group, &volume.id);
        }
        group.volumes.retain(|v| !changes.remove.contains(&v.id));
    }
    for initiator in added_initiators {
        if !group.initiators.iter().any(|i| i.id == initiator.id) {
            group.initiators.push(initiator);
        }
    }
    if let Some(changes) = &param.initiator_changes {
        group.initiators.retain(|i| !changes.remove.contains(&i.id));
    }
    let resource = NamedRelatedResource::new(&group.id, &group.name);
    reply(store.new_task(resource, "UPDATE EXPORT GROUP"))
}

async fn deactivate_export(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut store = state.lock();
    let Some(group) = store.exports.iter_mut().find(|e| e.id == id && !e.inactive) else {
        return missing("export group", &id);
    };
    group.inactive = true;
    let resource = NamedRelatedResource::new(&group.id, &group.name);
    reply(store.new_task(resource, "DELETE EXPORT GROUP"))
}

// =============================================================================
// ScaleIO Gateway
// =============================================================================

fn quoted(value: &str) -> Response {
    reply(value)
}

async fn sio_version(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !basic_matches(&headers, SIO_USERNAME, SIO_PASSWORD) {
        return error_reply(StatusCode::UNAUTHORIZED, "bad gateway credentials");
    }
    let version = state.lock().sio_version.clone();
    quoted(&version)
}

async fn sio_login(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !basic_matches(&headers, SIO_USERNAME, SIO_PASSWORD) {
        return error_reply(StatusCode::UNAUTHORIZED, "bad gateway credentials");
    }
    let token = {
        let mut store = state.lock();
        store.next_id += 1;
        let token = format!("sio-token-{}", store.next_id);
        store.sio_token = Some(token.clone());
        token
    };
    quoted(&token)
}

async fn sio_client(State(state): State<Shared>, Path(selector): Path<String>, headers: HeaderMap) -> Response {
    let store = state.lock();
    let secret = match GatewayAuth::for_version(&store.sio_version) {
        GatewayAuth::Token => store.sio_token.clone(),
        GatewayAuth::Password => Some(SIO_PASSWORD.to_string()),
    };
    let authorized = secret
        .map(|secret| basic_matches(&headers, SIO_USERNAME, &secret))
        .unwrap_or(false);
    if !authorized {
        return error_reply(StatusCode::UNAUTHORIZED, "token expired");
    }
    let ip = selector.strip_prefix("getByIp::").unwrap_or(&selector);
    match store.sdcs.get(ip) {
        Some(sdc_id) => quoted(sdc_id),
        None => missing("SDC", ip),
    }
}

// =============================================================================
// Router
// =============================================================================

fn router(state: Shared) -> Router {
    Router::new()
        // Session
        .route("/login", get(login).post(login))
        .route("/logout", get(logout))
        // Tenancy
        .route("/tenant", get(current_tenant))
        .route("/tenants/:id", get(show_tenant))
        .route("/tenants/:id/subtenants", get(subtenants))
        .route("/tenants/:id/projects", get(tenant_projects))
        .route("/tenants/:id/hosts", get(list_hosts).post(create_host))
        .route("/projects/:id", get(show_project))
        .route("/projects/:id/resources", get(project_resources))
        // Catalog
        .route("/vdc/varrays", get(list_varrays))
        .route("/vdc/varrays/:id", get(show_varray))
        .route("/vdc/storage-systems", get(list_storage_systems))
        .route("/vdc/storage-systems/:id", get(show_storage_system))
        .route("/block/vpools", get(list_vpools))
        .route("/block/vpools/:id", get(show_vpool))
        .route("/block/vpools/:id/varrays/:varray/capacity", get(vpool_capacity))
        // Volumes
        .route("/block/volumes", post(create_volume))
        .route("/block/volumes/search", get(search_volumes))
        .route("/block/volumes/deactivate", post(deactivate_volumes))
        .route("/block/volumes/vpool-change", post(change_vpool))
        .route("/block/volumes/:id", get(show_volume))
        .route("/block/volumes/:id/deactivate", post(deactivate_volume))
        .route("/block/volumes/:id/expand", post(expand_volume))
        .route("/block/volumes/:id/exports", get(volume_exports))
        .route("/block/volumes/:id/tags", get(volume_tags).put(update_volume_tags))
        .route("/block/volumes/:id/tasks", get(resource_tasks))
        .route("/block/volumes/:id/tasks/:op", get(task_status))
        .route("/block/volumes/:id/protection/full-copies", post(full_copy))
        .route(
            "/block/volumes/:id/protection/full-copies/:copy/detach",
            post(detach_full_copy),
        )
        .route(
            "/block/volumes/:id/protection/snapshots",
            get(volume_snapshots).post(create_volume_snapshot),
        )
        // Snapshots
        .route("/block/snapshots/:id", get(show_snapshot))
        .route("/block/snapshots/:id/deactivate", post(deactivate_snapshot))
        .route("/block/snapshots/:id/tasks/:op", get(task_status))
        .route("/block/snapshots/:id/protection/full-copies", post(snapshot_full_copy))
        // Consistency groups
        .route("/block/consistency-groups", post(create_group))
        .route("/block/consistency-groups/:id", get(show_group).put(update_group))
        .route("/block/consistency-groups/:id/deactivate", post(deactivate_group))
        .route("/block/consistency-groups/:id/tasks/:op", get(task_status))
        .route(
            "/block/consistency-groups/:id/protection/snapshots",
            get(group_snapshots).post(create_group_snapshot),
        )
        .route(
            "/block/consistency-groups/:id/protection/snapshots/:sid/deactivate",
            post(deactivate_group_snapshot),
        )
        // Exports
        .route("/block/exports", post(create_export))
        .route("/block/exports/search", get(search_exports))
        .route("/block/exports/:id", get(show_export).put(update_export))
        .route("/block/exports/:id/deactivate", post(deactivate_export))
        .route("/block/exports/:id/tasks/:op", get(task_status))
        // Compute
        .route("/compute/hosts/:id", get(show_host))
        .route(
            "/compute/hosts/:id/initiators",
            get(list_host_initiators).post(create_initiator),
        )
        .route("/compute/hosts/:id/exports", get(host_exports))
        .route("/compute/hosts/:id/tasks/:op", get(task_status))
        .route("/compute/initiators/search", get(search_initiators))
        .route("/compute/initiators/:id", get(show_initiator))
        .route("/compute/initiators/:id/tasks/:op", get(task_status))
        // ScaleIO gateway
        .route("/api/version", get(sio_version))
        .route("/api/login", get(sio_login))
        .route("/api/types/Client/instances/:selector", get(sio_client))
        .layer(middleware::from_fn_with_state(state.clone(), gate))
        .with_state(state)
}

// =============================================================================
// Handle
// =============================================================================

/// Running in-process controller; shut down on drop
pub struct MockController {
    state: Shared,
    port: u16,
    server: JoinHandle<()>,
}

impl MockController {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(Store::new()));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock controller");
        let port = listener.local_addr().expect("mock controller address").port();
        let app = router(state.clone());
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { state, port, server }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scaleio_config(&self) -> ScaleIoGatewayConfig {
        ScaleIoGatewayConfig {
            host: "127.0.0.1".into(),
            port: self.port,
            username: SIO_USERNAME.into(),
            password: SIO_PASSWORD.into(),
            verify_certificate: false,
            certificate_path: None,
            scheme: Scheme::Http,
        }
    }

    /// Configuration pointing at this controller with short timers
    pub fn config(&self) -> DriverConfig {
        DriverConfig {
            hostname: "127.0.0.1".into(),
            port: self.port,
            scheme: Scheme::Http,
            username: USERNAME.into(),
            password: PASSWORD.into(),
            tenant: "T".into(),
            project: "P".into(),
            varray: "VA".into(),
            verify_certificate: false,
            scaleio: Some(self.scaleio_config()),
            request_timeout_secs: 10,
            task_timeout_secs: 5,
            task_poll_interval_ms: 5,
            lun_poll_interval_secs: 0,
            attach_timeout_secs: 5,
            ..Default::default()
        }
    }

    /// Fresh client with its own session
    pub fn client(&self) -> ControllerClient {
        ControllerClient::with_session(&self.config(), Session::new(None)).expect("mock client")
    }

    pub fn tenant_id(&self) -> String {
        self.state.lock().tenant.id.clone()
    }

    pub fn project_id(&self) -> String {
        self.state.lock().project.id.clone()
    }

    pub fn varray_id(&self) -> String {
        self.state.lock().varray.id.clone()
    }

    pub fn vpool_id(&self, name: &str) -> String {
        self.state.lock().ensure_vpool(name).id
    }

    // -------------------------------------------------------------------------
    // Request log
    // -------------------------------------------------------------------------

    /// Requests seen for `method` on `path` (query string excluded)
    pub fn request_count(&self, method: &str, path: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|(m, p)| m == method && p == path)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Requests whose path starts with `prefix`
    pub fn requests_under(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|(_, p)| p.starts_with(prefix))
            .count()
    }

    pub fn login_count(&self) -> usize {
        self.request_count("POST", "/login")
    }

    /// Forget the issued token so the next call gets a 401
    pub fn expire_token(&self) {
        self.state.lock().token = None;
    }

    /// Answer requests with an unknown token using this status and payload
    pub fn reject_stale_tokens_with(&self, status: u16, details: &str) {
        let status = StatusCode::from_u16(status).expect("valid status code");
        self.state.lock().stale_reply = (status, details.to_string());
    }

    // -------------------------------------------------------------------------
    // Seeding and inspection
    // -------------------------------------------------------------------------

    pub fn seed_volume(&self, name: &str, size_gb: u64, vpool: &str) -> String {
        let mut store = self.state.lock();
        let vpool = store.ensure_vpool(vpool);
        let volume = store.insert_volume(name, size_gb as f64, vpool, None);
        store.finished_task(NamedRelatedResource::new(&volume.id, &volume.name), "CREATE VOLUME");
        volume.id
    }

    pub fn deactivate_volume(&self, id: &str) {
        let mut store = self.state.lock();
        if let Some(volume) = store.volume_mut(id) {
            volume.inactive = true;
        }
    }

    pub fn volume(&self, id: &str) -> Option<Volume> {
        self.state.lock().volumes.iter().find(|v| v.id == id).cloned()
    }

    /// Active volumes
    pub fn volumes(&self) -> Vec<Volume> {
        self.state
            .lock()
            .volumes
            .iter()
            .filter(|v| !v.inactive)
            .cloned()
            .collect()
    }

    /// Active snapshots
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state
            .lock()
            .snapshots
            .iter()
            .filter(|s| !s.inactive)
            .cloned()
            .collect()
    }

    /// Active consistency groups
    pub fn consistency_groups(&self) -> Vec<ConsistencyGroup> {
        self.state
            .lock()
            .groups
            .iter()
            .filter(|g| !g.inactive)
            .cloned()
            .collect()
    }

    pub fn seed_host(&self, name: &str, ports: &[&str]) -> String {
        let mut store = self.state.lock();
        let host = Host {
            id: store.new_id("Host"),
            name: name.to_string(),
            host_name: Some(name.to_string()),
            host_type: Some("Other".into()),
            inactive: false,
        };
        let host_id = host.id.clone();
        store.hosts.push(host);
        for port in ports {
            store.insert_initiator(&host_id, InitiatorProtocol::Iscsi, port, None);
        }
        host_id
    }

    pub fn seed_export_group(&self, name: &str, host_id: &str) -> String {
        let mut store = self.state.lock();
        let hosts = store
            .hosts
            .iter()
            .filter(|h| h.id == host_id)
            .map(|h| NamedRelatedResource::new(&h.id, &h.name))
            .collect();
        let group = ExportGroup {
            id: store.new_id("ExportGroup"),
            name: name.to_string(),
            inactive: false,
            export_type: Some(ExportGroupType::Host),
            volumes: Vec::new(),
            initiators: store.host_initiators(host_id),
            hosts,
            clusters: Vec::new(),
            varray: Some(store.varray_ref()),
            project: Some(store.project_ref()),
        };
        let id = group.id.clone();
        store.exports.push(group);
        id
    }

    /// Keep the group in search results but answer 404 when it is shown
    pub fn vanish_export_group(&self, id: &str) {
        self.state.lock().vanished_exports.push(id.to_string());
    }

    /// Active export groups
    pub fn export_groups(&self) -> Vec<ExportGroup> {
        self.state
            .lock()
            .exports
            .iter()
            .filter(|e| !e.inactive)
            .cloned()
            .collect()
    }

    /// Names of active hosts, in creation order
    pub fn host_names(&self) -> Vec<String> {
        self.state
            .lock()
            .hosts
            .iter()
            .filter(|h| !h.inactive)
            .map(|h| h.name.clone())
            .collect()
    }

    pub fn set_capacity(&self, vpool: &str, capacity: VpoolCapacity) {
        let mut store = self.state.lock();
        let vpool = store.ensure_vpool(vpool);
        store.capacity.insert(vpool.id, capacity);
    }

    /// Storage ports reported as ITL targets
    pub fn set_targets(&self, targets: Vec<ItlTarget>) {
        self.state.lock().targets = targets;
    }

    // -------------------------------------------------------------------------
    // Task and export behavior
    // -------------------------------------------------------------------------

    /// Newly created tasks answer `pending` to this many polls
    pub fn set_task_delay(&self, polls: u32) {
        self.state.lock().task_delay = polls;
    }

    /// Keep every task pending
    pub fn hold_tasks(&self, hold: bool) {
        self.state.lock().hold_tasks = hold;
    }

    /// The next created task ends in `error` with this message
    pub fn fail_next_task(&self, message: &str) {
        self.state.lock().fail_next = Some(message.to_string());
    }

    /// The next `count` ITL queries return no ITLs
    pub fn delay_itls(&self, count: u32) {
        self.state.lock().itl_delay = count;
    }

    /// ITLs through this initiator port report no LUN (`-1`)
    pub fn leave_lun_unassigned(&self, port: &str) {
        self.state.lock().unassigned_ports.push(normalize_port(port));
    }

    // -------------------------------------------------------------------------
    // ScaleIO gateway
    // -------------------------------------------------------------------------

    pub fn set_scaleio_version(&self, version: &str) {
        self.state.lock().sio_version = version.to_string();
    }

    pub fn register_sdc(&self, ip: &str, sdc_id: &str) {
        self.state.lock().sdcs.insert(ip.to_string(), sdc_id.to_string());
    }

    pub fn expire_scaleio_token(&self) {
        self.state.lock().sio_token = None;
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.server.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_requests_require_session() {
        let mock = MockController::start().await;
        let client = mock.client();

        let tenant = client.tenants().current().await.unwrap();
        assert_eq!(tenant.name, "T");
        assert_eq!(mock.login_count(), 1);

        // A rejected token is refreshed once
        mock.expire_token();
        client.tenants().current().await.unwrap();
        assert_eq!(mock.login_count(), 2);
        assert_eq!(client.metrics().reauth_retries.get(), 1);
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let mock = MockController::start().await;
        let mut config = mock.config();
        config.password = "wrong".into();
        let client = ControllerClient::with_session(&config, Session::new(None)).unwrap();

        let err = client.tenants().current().await.unwrap_err();
        assert_matches!(err, Error::Unauthenticated(_));
    }

    #[tokio::test]
    async fn test_volume_lifecycle_endpoints() {
        let mock = MockController::start().await;
        let client = mock.client();
        let id = mock.seed_volume("v1", 8, "gold");

        let volume = client.volumes().show(&id).await.unwrap().unwrap();
        assert_eq!(volume.provisioned_capacity_gb, 8.0);

        let tasks = client.volumes().deactivate(&id).await.unwrap();
        assert_eq!(tasks[0].state, TaskState::Pending);
        assert!(client.volumes().show(&id).await.unwrap().is_none());
        assert!(client.volumes().show_any(&id).await.unwrap().inactive);

        let err = client.volumes().show("urn:storageos:Volume:999:vdc1").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
