//! Controller wire model
//!
//! JSON representations exchanged with the controller REST API. Field names
//! follow the controller schema; unknown fields are ignored.

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Common
// =============================================================================

/// Reference to another resource, as embedded in most representations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRelatedResource {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NamedRelatedResource {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }
}

/// Result of a `/search` endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub resource: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
}

impl SearchResults {
    pub fn ids(self) -> Vec<String> {
        self.resource.into_iter().map(|r| r.id).collect()
    }
}

/// Controllers render capacities either as JSON numbers or as strings.
fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
        Null,
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) if s.trim().is_empty() => Ok(0.0),
        Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
        Raw::Null => Ok(0.0),
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_f64(deserializer).map(|v| v as i64)
}

fn lenient_opt_u16<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u16),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

// =============================================================================
// Tenancy
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inactive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtenantList {
    #[serde(default)]
    pub subtenant: Vec<NamedRelatedResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tenant: Option<NamedRelatedResource>,
    #[serde(default)]
    pub inactive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectList {
    #[serde(default)]
    pub project: Vec<NamedRelatedResource>,
}

/// Entry of `/projects/{id}/resources`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResource {
    pub id: String,
    pub name: String,
    pub resource_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectResourceList {
    #[serde(default)]
    pub project_resource: Vec<ProjectResource>,
}

// =============================================================================
// Virtual Arrays, Virtual Pools, Storage Systems
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualArray {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inactive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualArrayList {
    #[serde(default)]
    pub varray: Vec<NamedRelatedResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualPool {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inactive: bool,
    #[serde(default, rename = "type")]
    pub pool_type: Option<String>,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub provisioning_type: Option<String>,
    #[serde(default)]
    pub protection: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualPoolList {
    #[serde(default)]
    pub virtualpool: Vec<NamedRelatedResource>,
}

/// Capacity of one virtual pool within one virtual array
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VpoolCapacity {
    #[serde(deserialize_with = "lenient_f64", default)]
    pub free_gb: f64,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub used_gb: f64,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub provisioned_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSystem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub system_type: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub registration_status: Option<String>,
    #[serde(default)]
    pub inactive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSystemList {
    #[serde(default)]
    pub storage_system: Vec<NamedRelatedResource>,
}

// =============================================================================
// Volumes and Snapshots
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inactive: bool,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub provisioned_capacity_gb: f64,
    #[serde(deserialize_with = "lenient_f64", default)]
    pub allocated_capacity_gb: f64,
    #[serde(default)]
    pub vpool: Option<NamedRelatedResource>,
    #[serde(default)]
    pub varray: Option<NamedRelatedResource>,
    #[serde(default)]
    pub project: Option<NamedRelatedResource>,
    #[serde(default)]
    pub consistency_group: Option<NamedRelatedResource>,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub wwn: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inactive: bool,
    #[serde(default)]
    pub parent: Option<NamedRelatedResource>,
    #[serde(default)]
    pub consistency_group: Option<NamedRelatedResource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotList {
    #[serde(default)]
    pub snapshot: Vec<NamedRelatedResource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagList {
    #[serde(default)]
    pub tag: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagChanges {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inactive: bool,
    #[serde(default)]
    pub volumes: Vec<NamedRelatedResource>,
    #[serde(default)]
    pub project: Option<NamedRelatedResource>,
}

// =============================================================================
// Hosts, Initiators, Export Groups
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default, rename = "type")]
    pub host_type: Option<String>,
    #[serde(default)]
    pub inactive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostList {
    #[serde(default)]
    pub host: Vec<NamedRelatedResource>,
}

/// Initiator transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InitiatorProtocol {
    #[serde(rename = "iSCSI")]
    Iscsi,
    #[serde(rename = "FC")]
    Fc,
    #[serde(rename = "ScaleIO")]
    ScaleIo,
}

impl std::fmt::Display for InitiatorProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitiatorProtocol::Iscsi => write!(f, "iSCSI"),
            InitiatorProtocol::Fc => write!(f, "FC"),
            InitiatorProtocol::ScaleIo => write!(f, "ScaleIO"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Initiator {
    pub id: String,
    pub initiator_port: String,
    #[serde(default)]
    pub initiator_node: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub host: Option<NamedRelatedResource>,
    #[serde(default)]
    pub inactive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitiatorList {
    #[serde(default)]
    pub initiator: Vec<NamedRelatedResource>,
}

/// Export group flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportGroupType {
    Exclusive,
    Host,
    Cluster,
}

/// Volume entry inside an export group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportVolume {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lun: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inactive: bool,
    #[serde(default, rename = "type")]
    pub export_type: Option<ExportGroupType>,
    #[serde(default)]
    pub volumes: Vec<ExportVolume>,
    #[serde(default)]
    pub initiators: Vec<Initiator>,
    #[serde(default)]
    pub hosts: Vec<NamedRelatedResource>,
    #[serde(default)]
    pub clusters: Vec<NamedRelatedResource>,
    #[serde(default)]
    pub varray: Option<NamedRelatedResource>,
    #[serde(default)]
    pub project: Option<NamedRelatedResource>,
}

impl ExportGroup {
    pub fn has_volume(&self, volume_id: &str) -> bool {
        self.volumes.iter().any(|v| v.id == volume_id)
    }
}

// =============================================================================
// ITLs
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItlInitiator {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub port: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItlTarget {
    #[serde(default)]
    pub id: Option<String>,
    pub port: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_u16")]
    pub tcp_port: Option<u16>,
}

/// Initiator/Target/LUN record of an exported volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Itl {
    #[serde(deserialize_with = "lenient_i64")]
    pub hlu: i64,
    #[serde(default)]
    pub initiator: ItlInitiator,
    pub target: ItlTarget,
    #[serde(default)]
    pub export: Option<NamedRelatedResource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItlList {
    #[serde(default)]
    pub itl: Vec<Itl>,
}

// =============================================================================
// Tasks
// =============================================================================

/// Server-side state of an asynchronous operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Queued,
    Ready,
    Error,
    #[serde(other)]
    Unknown,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub op_id: String,
    pub resource: NamedRelatedResource,
    pub state: TaskState,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inactive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskList {
    #[serde(default)]
    pub task: Vec<Task>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskBundle {
    pub task: Vec<Task>,
}

/// Mutating endpoints answer with a single task or a task bundle
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TaskResponse {
    Single(Task),
    Bundle(TaskBundle),
}

impl TaskResponse {
    pub fn into_tasks(self) -> Vec<Task> {
        match self {
            TaskResponse::Single(task) => vec![task],
            TaskResponse::Bundle(bundle) => bundle.task,
        }
    }
}

// =============================================================================
// Request Bodies
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCreateParam {
    pub name: String,
    /// Size in bytes
    pub size: String,
    pub count: u32,
    pub project: String,
    pub varray: String,
    pub vpool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency_group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeExpandParam {
    /// New size in bytes
    pub new_size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullCopyParam {
    pub name: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCreateParam {
    pub name: String,
    pub create_inactive: bool,
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkIdParam {
    pub id: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpoolChangeParam {
    pub volumes: Vec<String>,
    pub vpool: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyGroupCreateParam {
    pub name: String,
    pub project: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeIdList {
    pub volume: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyGroupUpdateParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_volumes: Option<VolumeIdList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_volumes: Option<VolumeIdList>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCreateParam {
    #[serde(rename = "type")]
    pub host_type: String,
    pub name: String,
    pub host_name: String,
    pub discoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatorCreateParam {
    pub protocol: InitiatorProtocol,
    pub initiator_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_node: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportCreateParam {
    pub name: String,
    pub project: String,
    pub varray: String,
    #[serde(rename = "type")]
    pub export_type: ExportGroupType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<ExportVolume>,
}

/// `add`/`remove` change-set for volumes of an export group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeChanges {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<ExportVolume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

/// `add`/`remove` change-set of ids (initiators, hosts, clusters)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdChanges {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportUpdateParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_changes: Option<VolumeChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_changes: Option<IdChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_changes: Option<IdChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_changes: Option<IdChanges>,
}

impl ExportUpdateParam {
    pub fn add_volume(volume_id: &str) -> Self {
        Self {
            volume_changes: Some(VolumeChanges {
                add: vec![ExportVolume {
                    id: volume_id.to_string(),
                    lun: None,
                }],
                remove: vec![],
            }),
            ..Default::default()
        }
    }

    pub fn remove_volume(volume_id: &str) -> Self {
        Self {
            volume_changes: Some(VolumeChanges {
                add: vec![],
                remove: vec![volume_id.to_string()],
            }),
            ..Default::default()
        }
    }
}
