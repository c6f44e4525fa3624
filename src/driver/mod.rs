//! Driver Facade
//!
//! Implements the cloud block-storage driver contract on top of the
//! resource client, the name resolver, the task waiter and the export
//! orchestrator. One facade type serves the iSCSI, FC and ScaleIO
//! transports; only attach/detach and sizing differ between them.

pub mod common;
pub mod fc;
pub mod iscsi;
pub mod scaleio;
pub mod stats;

use crate::client::{ControllerClient, SnapshotParent};
use crate::config::DriverConfig;
use crate::domain::model::{FullCopyParam, Task, VolumeCreateParam};
use crate::domain::ports::{
    BlockStorageDriver, BlockStorageDriverRef, CgSnapshotRef, ConnectionInfo, ConsistencyGroupRef,
    Connector, FcZoning, ModelUpdate, Protocol, SnapshotRef, StatusUpdate, TerminationInfo,
    VolumeRef, VolumeStats, VolumeType,
};
use crate::error::{Error, Result};
use crate::export::{ExportOrchestrator, InitiatorSpec};
use crate::resolver::{Resolver, TenantRef};
use crate::scaleio::ScaleIoGateway;
use crate::task::TaskWaiter;
use async_trait::async_trait;
use common::guarded;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

const STATUS_AVAILABLE: &str = "available";
const STATUS_DELETED: &str = "deleted";

// =============================================================================
// Factory
// =============================================================================

/// Factory for driver instances
pub struct DriverFactory;

impl DriverFactory {
    /// Create a driver for the named transport (`iscsi`, `fc`, `scaleio`)
    pub async fn create(name: &str, config: DriverConfig) -> Result<BlockStorageDriverRef> {
        let protocol: Protocol = name.parse()?;
        let client = ControllerClient::connect(&config).await?;
        Ok(Arc::new(CoprHdDriver::new(protocol, config, client)?))
    }
}

// =============================================================================
// Facade
// =============================================================================

/// Block-storage driver backed by a CoprHD controller
pub struct CoprHdDriver {
    protocol: Protocol,
    config: DriverConfig,
    tenant: TenantRef,
    client: ControllerClient,
    resolver: Resolver,
    waiter: TaskWaiter,
    exports: ExportOrchestrator,
    gateway: Option<ScaleIoGateway>,
    stats: RwLock<Option<VolumeStats>>,
}

impl CoprHdDriver {
    pub fn new(protocol: Protocol, config: DriverConfig, client: ControllerClient) -> Result<Self> {
        let gateway = match protocol {
            Protocol::ScaleIo => config.scaleio.clone().map(ScaleIoGateway::new).transpose()?,
            _ => None,
        };
        let waiter = TaskWaiter::from_config(client.clone(), &config);
        Ok(Self {
            protocol,
            tenant: TenantRef::from_name(&config.tenant),
            resolver: Resolver::new(client.clone()),
            exports: ExportOrchestrator::new(client.clone(), waiter.clone(), &config),
            waiter,
            client,
            gateway,
            config,
            stats: RwLock::new(None),
        })
    }

    pub fn client(&self) -> &ControllerClient {
        &self.client
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    async fn project_id(&self) -> Result<String> {
        self.resolver.project_id(&self.tenant, &self.config.project).await
    }

    async fn varray_id(&self) -> Result<String> {
        self.resolver.varray_id(&self.config.varray).await
    }

    fn volume_name(&self, volume: &VolumeRef) -> String {
        common::volume_name(self.protocol, volume)
    }

    fn snapshot_name(&self, snapshot: &SnapshotRef) -> String {
        common::resource_name(
            self.protocol,
            &snapshot.id,
            &snapshot.name,
            snapshot.display_name.as_deref(),
        )
    }

    fn group_name(&self, group: &ConsistencyGroupRef) -> String {
        common::resource_name(self.protocol, &group.id, &group.name, group.display_name.as_deref())
    }

    async fn volume_id(&self, volume: &VolumeRef) -> Result<String> {
        let project_id = self.project_id().await?;
        self.resolver.volume_id(&project_id, &self.volume_name(volume)).await
    }

    /// Controller id of the volume, `None` when it no longer exists
    async fn existing_volume_id(&self, volume: &VolumeRef) -> Result<Option<String>> {
        match self.volume_id(volume).await {
            Ok(id) => Ok(Some(id)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn snapshot_id(&self, snapshot: &SnapshotRef) -> Result<String> {
        let volume_id = self.volume_id(&snapshot.volume).await?;
        self.resolver
            .snapshot_id(&volume_id, &self.snapshot_name(snapshot))
            .await
    }

    async fn group_id(&self, group: &ConsistencyGroupRef) -> Result<String> {
        let project_id = self.project_id().await?;
        self.resolver
            .consistency_group_id(&project_id, &self.group_name(group))
            .await
    }

    fn gateway(&self) -> Result<&ScaleIoGateway> {
        self.gateway.as_ref().ok_or_else(|| {
            Error::Configuration("missing required option: coprhd_scaleio_rest_gateway_host".into())
        })
    }

    // =========================================================================
    // Shared Steps
    // =========================================================================

    /// Size allocated on the backend for a requested size
    fn provisioned_size(&self, size_gb: u64) -> u64 {
        match self.protocol {
            Protocol::ScaleIo => scaleio::round_size_gb(size_gb),
            _ => size_gb,
        }
    }

    /// ScaleIO reports the rounded size back to the caller
    fn size_update(&self, provisioned_gb: u64) -> ModelUpdate {
        match self.protocol {
            Protocol::ScaleIo => ModelUpdate {
                size_gb: Some(provisioned_gb),
                ..Default::default()
            },
            _ => ModelUpdate::default(),
        }
    }

    /// Wait for every task and return the resource id of the first
    async fn created_resource(&self, tasks: Vec<Task>, what: &str) -> Result<String> {
        let done = self.waiter.wait_all_ready(&tasks).await?;
        done.first()
            .map(|t| t.resource.id.clone())
            .ok_or_else(|| Error::Internal(format!("{} returned no task", what)))
    }

    async fn apply_tags(&self, volume_id: &str, volume: &VolumeRef) -> Result<()> {
        let existing = self.client.volumes().tags(volume_id).await?;
        let changes = common::tag_changes(&existing, volume);
        debug!(
            "Tagging volume {}: +{} -{}",
            volume_id,
            changes.add.len(),
            changes.remove.len()
        );
        self.client.volumes().update_tags(volume_id, &changes).await
    }

    async fn expand(&self, volume_id: &str, size_gb: u64) -> Result<()> {
        let tasks = self
            .client
            .volumes()
            .expand(volume_id, common::gib_to_bytes(size_gb))
            .await?;
        self.waiter.wait_all_ready(&tasks).await?;
        Ok(())
    }

    async fn deactivate_volume(&self, volume_id: &str) -> Result<()> {
        match self.client.volumes().deactivate(volume_id).await {
            Ok(tasks) => {
                self.waiter.wait_all_ready(&tasks).await?;
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Initiators the connector presents on this transport
    async fn initiators(&self, connector: &Connector) -> Result<Vec<InitiatorSpec>> {
        match self.protocol {
            Protocol::Iscsi => iscsi::initiators(connector),
            Protocol::FibreChannel => fc::initiators(connector),
            Protocol::ScaleIo => {
                let ip = connector.ip.as_deref().filter(|ip| !ip.is_empty()).ok_or_else(|| {
                    Error::InvalidInput(format!("connector of {} has no IP address", connector.host))
                })?;
                let sdc_id = self.gateway()?.sdc_id(ip).await?;
                Ok(vec![InitiatorSpec::port(sdc_id)])
            }
        }
    }

    fn group_statuses(snapshots: &[SnapshotRef], status: &str) -> Vec<StatusUpdate> {
        snapshots
            .iter()
            .map(|s| StatusUpdate {
                id: s.id.clone(),
                status: status.to_string(),
            })
            .collect()
    }
}

#[async_trait]
impl BlockStorageDriver for CoprHdDriver {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn do_setup(&self) -> Result<()> {
        guarded("Set up driver", &self.config.hostname, async {
            let project_id = self.project_id().await?;
            let varray_id = self.varray_id().await?;
            if let Some(gateway) = &self.gateway {
                let version = gateway.version().await?;
                info!("ScaleIO gateway {} runs {}", gateway.config().host, version);
            }
            info!(
                "Driver ready on {} (project {}, varray {})",
                self.config.hostname, project_id, varray_id
            );
            Ok(())
        })
        .await
    }

    async fn check_for_setup_error(&self) -> Result<()> {
        self.config.validate()?;
        if self.protocol == Protocol::ScaleIo {
            self.config.validate_scaleio()?;
        }
        Ok(())
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    async fn create_volume(&self, volume: &VolumeRef) -> Result<ModelUpdate> {
        let name = self.volume_name(volume);
        guarded("Create volume", &name, async {
            let size_gb = self.provisioned_size(volume.size_gb);
            let project_id = self.project_id().await?;
            self.resolver.ensure_volume_absent(&project_id, &name).await?;

            let vpool_name = common::vpool_name(volume.volume_type.as_ref())?;
            let vpool_id = self.resolver.vpool_id(&vpool_name).await?;
            let varray_id = self.varray_id().await?;
            let consistency_group = match &volume.consistency_group {
                Some(group) => Some(self.group_id(group).await?),
                None => None,
            };

            info!("Creating volume {} ({} GB) in vpool {}", name, size_gb, vpool_name);
            let param = VolumeCreateParam {
                name: name.clone(),
                size: common::gib_to_bytes(size_gb).to_string(),
                count: 1,
                project: project_id,
                varray: varray_id,
                vpool: vpool_id,
                consistency_group,
            };
            let tasks = self.client.volumes().create(&param).await?;
            let volume_id = self.created_resource(tasks, "volume create").await?;
            self.apply_tags(&volume_id, volume).await?;
            Ok(self.size_update(size_gb))
        })
        .await
    }

    async fn create_cloned_volume(&self, volume: &VolumeRef, source: &VolumeRef) -> Result<ModelUpdate> {
        let name = self.volume_name(volume);
        guarded("Clone volume", &name, async {
            let project_id = self.project_id().await?;
            self.resolver.ensure_volume_absent(&project_id, &name).await?;
            let source_id = self.volume_id(source).await?;

            info!("Cloning volume {} into {}", self.volume_name(source), name);
            let param = FullCopyParam {
                name: name.clone(),
                count: 1,
            };
            let tasks = self.client.volumes().full_copy(&source_id, &param).await?;
            let clone_id = self.created_resource(tasks, "full copy").await?;

            let tasks = self.client.volumes().detach_full_copy(&source_id, &clone_id).await?;
            self.waiter.wait_all_ready(&tasks).await?;
            self.apply_tags(&clone_id, volume).await?;

            let size_gb = self.provisioned_size(volume.size_gb);
            if volume.size_gb > source.size_gb {
                debug!("Growing clone {} to {} GB", name, size_gb);
                self.expand(&clone_id, size_gb).await?;
            }
            Ok(self.size_update(size_gb))
        })
        .await
    }

    async fn create_volume_from_snapshot(
        &self,
        volume: &VolumeRef,
        snapshot: &SnapshotRef,
    ) -> Result<ModelUpdate> {
        if self.protocol == Protocol::ScaleIo {
            return Err(Error::BackendUnsupported(
                "create volume from snapshot on ScaleIO".into(),
            ));
        }
        let name = self.volume_name(volume);
        guarded("Create volume from snapshot", &name, async {
            let project_id = self.project_id().await?;
            self.resolver.ensure_volume_absent(&project_id, &name).await?;
            let snapshot_id = self.snapshot_id(snapshot).await?;

            info!("Creating volume {} from snapshot {}", name, self.snapshot_name(snapshot));
            let param = FullCopyParam {
                name: name.clone(),
                count: 1,
            };
            let tasks = self.client.snapshots().full_copy(&snapshot_id, &param).await?;
            let volume_id = self.created_resource(tasks, "snapshot full copy").await?;
            self.apply_tags(&volume_id, volume).await?;

            if volume.size_gb > snapshot.volume.size_gb {
                self.expand(&volume_id, volume.size_gb).await?;
            }
            Ok(ModelUpdate::default())
        })
        .await
    }

    async fn extend_volume(&self, volume: &VolumeRef, new_size_gb: u64) -> Result<ModelUpdate> {
        if new_size_gb <= volume.size_gb {
            return Err(Error::InvalidInput(format!(
                "new size {} GB must exceed current size {} GB",
                new_size_gb, volume.size_gb
            )));
        }
        let name = self.volume_name(volume);
        guarded("Extend volume", &name, async {
            let volume_id = self.volume_id(volume).await?;
            let size_gb = self.provisioned_size(new_size_gb);
            info!("Extending volume {} to {} GB", name, size_gb);
            self.expand(&volume_id, size_gb).await?;
            Ok(self.size_update(size_gb))
        })
        .await
    }

    async fn delete_volume(&self, volume: &VolumeRef) -> Result<()> {
        let name = self.volume_name(volume);
        guarded("Delete volume", &name, async {
            let Some(volume_id) = self.existing_volume_id(volume).await? else {
                warn!("Volume {} not found on the controller, nothing to delete", name);
                return Ok(());
            };
            info!("Deleting volume {}", name);
            self.deactivate_volume(&volume_id).await
        })
        .await
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    async fn create_snapshot(&self, snapshot: &SnapshotRef) -> Result<()> {
        let name = self.snapshot_name(snapshot);
        guarded("Create snapshot", &name, async {
            let volume_id = self.volume_id(&snapshot.volume).await?;
            match self.resolver.snapshot_id(&volume_id, &name).await {
                Ok(_) => {
                    return Err(Error::AlreadyExists {
                        kind: "snapshot".into(),
                        name: name.clone(),
                    })
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }

            info!("Creating snapshot {} of volume {}", name, volume_id);
            let tasks = self
                .client
                .snapshots()
                .create(SnapshotParent::Volume, &volume_id, &name)
                .await?;
            self.waiter.wait_all_ready(&tasks).await?;
            Ok(())
        })
        .await
    }

    async fn delete_snapshot(&self, snapshot: &SnapshotRef) -> Result<()> {
        let name = self.snapshot_name(snapshot);
        guarded("Delete snapshot", &name, async {
            let snapshot_id = match self.snapshot_id(snapshot).await {
                Ok(id) => id,
                Err(e) if e.is_not_found() => {
                    warn!("Snapshot {} not found on the controller, nothing to delete", name);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            info!("Deleting snapshot {}", name);
            let tasks = self
                .client
                .snapshots()
                .deactivate(SnapshotParent::Volume, &snapshot_id)
                .await?;
            self.waiter.wait_all_ready(&tasks).await?;
            Ok(())
        })
        .await
    }

    // =========================================================================
    // Attach / Detach
    // =========================================================================

    async fn initialize_connection(&self, volume: &VolumeRef, connector: &Connector) -> Result<ConnectionInfo> {
        let name = self.volume_name(volume);
        guarded("Attach volume", &name, async {
            let volume_id = self.volume_id(volume).await?;
            let initiators = self.initiators(connector).await?;
            info!("Attaching volume {} to {} over {}", name, connector.host, self.protocol);
            let itls = self
                .exports
                .attach(&volume_id, self.protocol, &initiators, &connector.host)
                .await?;

            match self.protocol {
                Protocol::Iscsi => Ok(ConnectionInfo::Iscsi(iscsi::connection_info(&itls, &volume.id)?)),
                Protocol::FibreChannel => Ok(ConnectionInfo::FibreChannel(fc::connection_info(
                    &itls, connector, &volume.id,
                )?)),
                Protocol::ScaleIo => {
                    let gateway = self.gateway()?;
                    Ok(ConnectionInfo::ScaleIo(scaleio::connection_info(
                        &name,
                        connector,
                        gateway.config(),
                        gateway.token(),
                        volume.volume_type.as_ref().map(|t| &t.extra_specs),
                    )))
                }
            }
        })
        .await
    }

    async fn terminate_connection(&self, volume: &VolumeRef, connector: &Connector) -> Result<TerminationInfo> {
        let name = self.volume_name(volume);
        guarded("Detach volume", &name, async {
            let Some(volume_id) = self.existing_volume_id(volume).await? else {
                warn!("Volume {} not found on the controller, nothing to detach", name);
                return Ok(match self.protocol {
                    Protocol::Iscsi => TerminationInfo::Iscsi,
                    Protocol::FibreChannel => TerminationInfo::FibreChannel(FcZoning::default()),
                    Protocol::ScaleIo => TerminationInfo::ScaleIo,
                });
            };
            let initiators = self.initiators(connector).await?;
            info!("Detaching volume {} from {}", name, connector.host);
            let outcome = self.exports.detach(&volume_id, &initiators).await?;

            Ok(match self.protocol {
                Protocol::Iscsi => TerminationInfo::Iscsi,
                Protocol::ScaleIo => TerminationInfo::ScaleIo,
                Protocol::FibreChannel if outcome.remaining_volumes > 0 => {
                    debug!(
                        "{} volumes still exported to {}, keeping zones",
                        outcome.remaining_volumes, connector.host
                    );
                    TerminationInfo::FibreChannel(FcZoning::default())
                }
                Protocol::FibreChannel => TerminationInfo::FibreChannel(fc::zoning(&outcome.itls, connector)),
            })
        })
        .await
    }

    // =========================================================================
    // Consistency Groups
    // =========================================================================

    async fn create_consistencygroup(&self, group: &ConsistencyGroupRef) -> Result<ModelUpdate> {
        let name = self.group_name(group);
        guarded("Create consistency group", &name, async {
            let project_id = self.project_id().await?;
            info!("Creating consistency group {}", name);
            let created = self.client.consistency_groups().create(&name, &project_id).await?;
            debug!("Consistency group {} is {}", name, created.id);
            Ok(ModelUpdate {
                status: Some(STATUS_AVAILABLE.to_string()),
                ..Default::default()
            })
        })
        .await
    }

    async fn update_consistencygroup(
        &self,
        group: &ConsistencyGroupRef,
        add_volumes: &[VolumeRef],
        remove_volumes: &[VolumeRef],
    ) -> Result<()> {
        let name = self.group_name(group);
        guarded("Update consistency group", &name, async {
            let group_id = self.group_id(group).await?;
            let mut add = Vec::with_capacity(add_volumes.len());
            for volume in add_volumes {
                add.push(self.volume_id(volume).await?);
            }
            let mut remove = Vec::with_capacity(remove_volumes.len());
            for volume in remove_volumes {
                match self.existing_volume_id(volume).await? {
                    Some(id) => remove.push(id),
                    None => warn!("Volume {} already gone from {}", self.volume_name(volume), name),
                }
            }
            if add.is_empty() && remove.is_empty() {
                return Ok(());
            }

            info!(
                "Updating consistency group {}: +{} -{}",
                name,
                add.len(),
                remove.len()
            );
            let tasks = self
                .client
                .consistency_groups()
                .update(&group_id, &add, &remove)
                .await?;
            self.waiter.wait_all_ready(&tasks).await?;
            Ok(())
        })
        .await
    }

    async fn delete_consistencygroup(
        &self,
        group: &ConsistencyGroupRef,
        volumes: &[VolumeRef],
    ) -> Result<Vec<StatusUpdate>> {
        let name = self.group_name(group);
        guarded("Delete consistency group", &name, async {
            let mut statuses = Vec::with_capacity(volumes.len());
            for volume in volumes {
                if let Some(volume_id) = self.existing_volume_id(volume).await? {
                    self.deactivate_volume(&volume_id).await?;
                }
                statuses.push(StatusUpdate {
                    id: volume.id.clone(),
                    status: STATUS_DELETED.to_string(),
                });
            }

            match self.group_id(group).await {
                Ok(group_id) => {
                    info!("Deleting consistency group {}", name);
                    let tasks = self.client.consistency_groups().deactivate(&group_id).await?;
                    self.waiter.wait_all_ready(&tasks).await?;
                }
                Err(e) if e.is_not_found() => {
                    warn!("Consistency group {} not found on the controller", name)
                }
                Err(e) => return Err(e),
            }
            Ok(statuses)
        })
        .await
    }

    async fn create_cgsnapshot(
        &self,
        cgsnapshot: &CgSnapshotRef,
        snapshots: &[SnapshotRef],
    ) -> Result<Vec<StatusUpdate>> {
        let name = common::resource_name(self.protocol, &cgsnapshot.id, &cgsnapshot.name, None);
        guarded("Create consistency group snapshot", &name, async {
            let group_id = self.group_id(&cgsnapshot.consistency_group).await?;
            info!("Creating snapshot {} of consistency group {}", name, group_id);
            let tasks = self
                .client
                .consistency_groups()
                .create_snapshot(&group_id, &name)
                .await?;
            self.waiter.wait_all_ready(&tasks).await?;
            Ok(Self::group_statuses(snapshots, STATUS_AVAILABLE))
        })
        .await
    }

    async fn delete_cgsnapshot(
        &self,
        cgsnapshot: &CgSnapshotRef,
        snapshots: &[SnapshotRef],
    ) -> Result<Vec<StatusUpdate>> {
        let name = common::resource_name(self.protocol, &cgsnapshot.id, &cgsnapshot.name, None);
        guarded("Delete consistency group snapshot", &name, async {
            let group_id = match self.group_id(&cgsnapshot.consistency_group).await {
                Ok(id) => id,
                Err(e) if e.is_not_found() => return Ok(Self::group_statuses(snapshots, STATUS_DELETED)),
                Err(e) => return Err(e),
            };
            let listed = self.client.consistency_groups().snapshots(&group_id).await?;
            match listed.iter().find(|s| s.name.as_deref() == Some(name.as_str())) {
                Some(snapshot) => {
                    info!("Deleting snapshot {} of consistency group {}", name, group_id);
                    let tasks = self
                        .client
                        .consistency_groups()
                        .deactivate_snapshot(&group_id, &snapshot.id)
                        .await?;
                    self.waiter.wait_all_ready(&tasks).await?;
                }
                None => warn!("Snapshot {} not found in consistency group {}", name, group_id),
            }
            Ok(Self::group_statuses(snapshots, STATUS_DELETED))
        })
        .await
    }

    // =========================================================================
    // Stats and Retype
    // =========================================================================

    async fn get_volume_stats(&self, refresh: bool) -> Result<VolumeStats> {
        if !refresh {
            let cached = self.stats.read().clone();
            if let Some(stats) = cached {
                return Ok(stats);
            }
        }
        guarded("Update volume stats", &self.config.volume_backend_name, async {
            let project_id = self.project_id().await?;
            let volumes = self.resolver.project_volumes(&project_id).await?;
            let totals = stats::collect(&self.client, &volumes).await?;
            let report = stats::volume_stats(&self.config.volume_backend_name, self.protocol, totals);
            debug!(
                "Capacity: {:.1} GB free of {:.1} GB",
                report.free_capacity_gb, report.total_capacity_gb
            );
            *self.stats.write() = Some(report.clone());
            Ok(report)
        })
        .await
    }

    async fn retype(&self, volume: &VolumeRef, new_type: &VolumeType) -> Result<bool> {
        let name = self.volume_name(volume);
        guarded("Retype volume", &name, async {
            let volume_id = self.volume_id(volume).await?;
            let vpool_name = common::vpool_name(Some(new_type))?;
            let vpool_id = self.resolver.vpool_id(&vpool_name).await?;
            let current = self
                .client
                .volumes()
                .show(&volume_id)
                .await?
                .and_then(|v| v.vpool)
                .map(|v| v.id);
            if current.as_deref() == Some(vpool_id.as_str()) {
                debug!("Volume {} already in vpool {}", name, vpool_name);
                return Ok(true);
            }

            info!("Moving volume {} to vpool {}", name, vpool_name);
            let tasks = self
                .client
                .volumes()
                .change_vpool(&[volume_id], &vpool_id)
                .await?;
            self.waiter.wait_all_ready(&tasks).await?;
            Ok(true)
        })
        .await
    }
}
