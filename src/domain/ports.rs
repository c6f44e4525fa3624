//! Domain Ports - Block storage driver contract
//!
//! These types describe what the cloud block-storage service hands to a
//! driver and what it expects back. The driver facade implements
//! [`BlockStorageDriver`] once per transport.

use crate::domain::model::InitiatorProtocol;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Transport
// =============================================================================

/// Host attachment transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Iscsi,
    #[serde(rename = "fc")]
    FibreChannel,
    ScaleIo,
}

impl Protocol {
    /// Protocol of the initiators registered for this transport
    pub fn initiator_protocol(&self) -> InitiatorProtocol {
        match self {
            Protocol::Iscsi => InitiatorProtocol::Iscsi,
            Protocol::FibreChannel => InitiatorProtocol::Fc,
            Protocol::ScaleIo => InitiatorProtocol::ScaleIo,
        }
    }

    /// Name reported as `storage_protocol` in capacity stats
    pub fn storage_protocol(&self) -> &'static str {
        match self {
            Protocol::Iscsi => "iSCSI",
            Protocol::FibreChannel => "FC",
            Protocol::ScaleIo => "scaleio",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Iscsi => write!(f, "iscsi"),
            Protocol::FibreChannel => write!(f, "fc"),
            Protocol::ScaleIo => write!(f, "scaleio"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "iscsi" => Ok(Protocol::Iscsi),
            "fc" | "fibre_channel" | "fibrechannel" => Ok(Protocol::FibreChannel),
            "scaleio" => Ok(Protocol::ScaleIo),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown protocol: {}. Use 'iscsi', 'fc' or 'scaleio'",
                other
            ))),
        }
    }
}

// =============================================================================
// Cloud-side Resources
// =============================================================================

/// Volume type as configured in the cloud service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeType {
    pub name: String,
    #[serde(default)]
    pub extra_specs: BTreeMap<String, String>,
}

/// Consistency group as seen by the cloud service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyGroupRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Volume as seen by the cloud service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeRef {
    /// Cloud-side id
    pub id: String,
    /// Cloud-side name
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Size in gigabytes
    pub size_gb: u64,
    #[serde(default)]
    pub volume_type: Option<VolumeType>,
    #[serde(default)]
    pub consistency_group: Option<ConsistencyGroupRef>,
    /// User metadata, mirrored to the controller as tags
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Snapshot as seen by the cloud service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Parent volume
    pub volume: VolumeRef,
}

/// Consistency-group snapshot as seen by the cloud service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CgSnapshotRef {
    pub id: String,
    pub name: String,
    pub consistency_group: ConsistencyGroupRef,
}

/// Host-side connector properties
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Connector {
    /// Host name
    pub host: String,
    /// Host IP address
    #[serde(default)]
    pub ip: Option<String>,
    /// iSCSI initiator IQN
    #[serde(default)]
    pub initiator: Option<String>,
    /// FC port WWNs
    #[serde(default)]
    pub wwpns: Vec<String>,
    /// FC node WWNs
    #[serde(default)]
    pub wwnns: Vec<String>,
}

// =============================================================================
// Driver Results
// =============================================================================

/// Fields the driver changes on the cloud-side record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_gb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Per-member status after a group operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub id: String,
    pub status: String,
}

/// iSCSI attachment data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IscsiConnection {
    pub target_discovered: bool,
    pub target_iqn: String,
    pub target_portal: String,
    pub target_lun: i64,
    pub volume_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_password: Option<String>,
}

/// Fibre Channel attachment data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FcConnection {
    pub target_discovered: bool,
    pub target_lun: i64,
    pub target_wwn: Vec<String>,
    pub initiator_target_map: BTreeMap<String, Vec<String>>,
    pub volume_id: String,
}

/// ScaleIO attachment data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct ScaleIoConnection {
    pub scaleIO_volname: String,
    pub hostIP: Option<String>,
    pub serverIP: String,
    pub serverPort: u16,
    pub serverUsername: String,
    pub serverPassword: String,
    pub serverToken: Option<String>,
    pub iopsLimit: Option<u64>,
    pub bandwidthLimit: Option<u64>,
}

/// Result of `initialize_connection`, serialized as
/// `{"driver_volume_type": ..., "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "driver_volume_type", content = "data")]
pub enum ConnectionInfo {
    #[serde(rename = "iscsi")]
    Iscsi(IscsiConnection),
    #[serde(rename = "fibre_channel")]
    FibreChannel(FcConnection),
    #[serde(rename = "scaleio")]
    ScaleIo(ScaleIoConnection),
}

/// Zoning data handed back on FC detach; empty means "leave zones alone"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FcZoning {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_wwn: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub initiator_target_map: BTreeMap<String, Vec<String>>,
}

impl FcZoning {
    pub fn is_empty(&self) -> bool {
        self.target_wwn.is_empty() && self.initiator_target_map.is_empty()
    }
}

/// Result of `terminate_connection`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "driver_volume_type", content = "data")]
pub enum TerminationInfo {
    #[serde(rename = "iscsi")]
    Iscsi,
    #[serde(rename = "fibre_channel")]
    FibreChannel(FcZoning),
    #[serde(rename = "scaleio")]
    ScaleIo,
}

/// Capacity report merged over the fixed backend descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub volume_backend_name: String,
    pub vendor_name: String,
    pub driver_version: String,
    pub storage_protocol: String,
    pub free_capacity_gb: f64,
    pub total_capacity_gb: f64,
    pub reserved_percentage: f64,
    pub consistencygroup_support: bool,
}

// =============================================================================
// Block Storage Driver Port
// =============================================================================

/// Cloud block-storage driver contract
#[async_trait]
pub trait BlockStorageDriver: Send + Sync {
    /// Transport this driver attaches volumes over
    fn protocol(&self) -> Protocol;

    /// Authenticate and prime lookups
    async fn do_setup(&self) -> Result<()>;

    /// Validate configuration
    async fn check_for_setup_error(&self) -> Result<()>;

    async fn create_volume(&self, volume: &VolumeRef) -> Result<ModelUpdate>;

    async fn create_cloned_volume(&self, volume: &VolumeRef, source: &VolumeRef) -> Result<ModelUpdate>;

    async fn create_volume_from_snapshot(
        &self,
        volume: &VolumeRef,
        snapshot: &SnapshotRef,
    ) -> Result<ModelUpdate>;

    async fn extend_volume(&self, volume: &VolumeRef, new_size_gb: u64) -> Result<ModelUpdate>;

    async fn delete_volume(&self, volume: &VolumeRef) -> Result<()>;

    async fn create_snapshot(&self, snapshot: &SnapshotRef) -> Result<()>;

    async fn delete_snapshot(&self, snapshot: &SnapshotRef) -> Result<()>;

    /// Exports are created on attach; nothing to do here
    async fn create_export(&self, _volume: &VolumeRef) -> Result<()> {
        Ok(())
    }

    async fn ensure_export(&self, _volume: &VolumeRef) -> Result<()> {
        Ok(())
    }

    async fn remove_export(&self, _volume: &VolumeRef) -> Result<()> {
        Ok(())
    }

    async fn initialize_connection(&self, volume: &VolumeRef, connector: &Connector) -> Result<ConnectionInfo>;

    async fn terminate_connection(&self, volume: &VolumeRef, connector: &Connector) -> Result<TerminationInfo>;

    async fn create_consistencygroup(&self, group: &ConsistencyGroupRef) -> Result<ModelUpdate>;

    async fn update_consistencygroup(
        &self,
        group: &ConsistencyGroupRef,
        add_volumes: &[VolumeRef],
        remove_volumes: &[VolumeRef],
    ) -> Result<()>;

    async fn delete_consistencygroup(
        &self,
        group: &ConsistencyGroupRef,
        volumes: &[VolumeRef],
    ) -> Result<Vec<StatusUpdate>>;

    async fn create_cgsnapshot(
        &self,
        cgsnapshot: &CgSnapshotRef,
        snapshots: &[SnapshotRef],
    ) -> Result<Vec<StatusUpdate>>;

    async fn delete_cgsnapshot(
        &self,
        cgsnapshot: &CgSnapshotRef,
        snapshots: &[SnapshotRef],
    ) -> Result<Vec<StatusUpdate>>;

    /// Capacity report; cached unless `refresh`
    async fn get_volume_stats(&self, refresh: bool) -> Result<VolumeStats>;

    /// Move a volume to the virtual pool of another volume type
    async fn retype(&self, volume: &VolumeRef, new_type: &VolumeType) -> Result<bool>;
}

pub type BlockStorageDriverRef = Arc<dyn BlockStorageDriver>;
