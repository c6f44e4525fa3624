//! Export Orchestrator
//!
//! Attaching a volume to a host means: find an export group already serving
//! one of the host's initiators, or find/create the host, register missing
//! initiators and create a host export group; then add the volume and wait
//! until the controller reports a LUN for it. Detach only removes the
//! volume from the groups; hosts, initiators and empty groups stay.

use crate::client::ControllerClient;
use crate::config::DriverConfig;
use crate::domain::model::{
    ExportCreateParam, ExportGroup, ExportGroupType, ExportUpdateParam, HostCreateParam,
    InitiatorCreateParam, Itl,
};
use crate::domain::ports::Protocol;
use crate::error::{Error, Result};
use crate::resolver::{Resolver, TenantRef};
use crate::task::TaskWaiter;
use futures::future::try_join_all;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Host type registered for hosts created on attach
const HOST_TYPE: &str = "Other";

/// Initiator presented by the connecting host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatorSpec {
    /// iSCSI IQN, FC port WWN or ScaleIO SDC id
    pub port: String,
    /// FC node WWN
    pub node: Option<String>,
}

impl InitiatorSpec {
    pub fn port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            node: None,
        }
    }

    pub fn with_node(port: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            node: Some(node.into()),
        }
    }
}

/// Result of removing a volume from the host's export groups
#[derive(Debug, Clone, Default)]
pub struct DetachOutcome {
    /// ITLs that bound the volume to the connector before removal
    pub itls: Vec<Itl>,
    /// Volumes still exported to the connector's initiators
    pub remaining_volumes: usize,
}

/// Port identifiers compare without separators and case
pub fn normalize_port(port: &str) -> String {
    port.replace(':', "").to_lowercase()
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

/// Drives the host / initiator / export-group state machine
#[derive(Clone)]
pub struct ExportOrchestrator {
    client: ControllerClient,
    resolver: Resolver,
    waiter: TaskWaiter,
    tenant: TenantRef,
    project: String,
    varray: String,
    lun_poll_interval: Duration,
    attach_timeout: Duration,
}

impl ExportOrchestrator {
    pub fn new(client: ControllerClient, waiter: TaskWaiter, config: &DriverConfig) -> Self {
        Self {
            resolver: Resolver::new(client.clone()),
            client,
            waiter,
            tenant: TenantRef::from_name(&config.tenant),
            project: config.project.clone(),
            varray: config.varray.clone(),
            lun_poll_interval: config.lun_poll_interval(),
            attach_timeout: config.attach_timeout(),
        }
    }

    /// Export a volume to the initiators and return the ITLs once a LUN
    /// is assigned.
    pub async fn attach(
        &self,
        volume_id: &str,
        protocol: Protocol,
        initiators: &[InitiatorSpec],
        hostname: &str,
    ) -> Result<Vec<Itl>> {
        if initiators.is_empty() {
            return Err(Error::InvalidInput("connector carries no initiators".into()));
        }
        let ports: HashSet<String> = initiators.iter().map(|i| normalize_port(&i.port)).collect();
        let project_id = self.resolver.project_id(&self.tenant, &self.project).await?;
        let varray_id = self.resolver.varray_id(&self.varray).await?;

        let group = match self.find_export_group(&project_id, &varray_id, &ports).await? {
            Some(group) => {
                debug!("Reusing export group {} for host {}", group.name, hostname);
                group
            }
            None => {
                self.create_host_export(&project_id, &varray_id, protocol, initiators, &ports, hostname)
                    .await?
            }
        };

        if group.has_volume(volume_id) {
            debug!("Volume {} already in export group {}", volume_id, group.name);
        } else {
            info!("Adding volume {} to export group {}", volume_id, group.name);
            let tasks = self
                .client
                .export_groups()
                .update(&group.id, &ExportUpdateParam::add_volume(volume_id))
                .await?;
            self.waiter.wait_all_ready(&tasks).await?;
        }

        self.wait_for_luns(volume_id, protocol, &ports).await
    }

    /// Remove the volume from every export group serving the initiators
    pub async fn detach(&self, volume_id: &str, initiators: &[InitiatorSpec]) -> Result<DetachOutcome> {
        let ports: HashSet<String> = initiators.iter().map(|i| normalize_port(&i.port)).collect();
        let project_id = self.resolver.project_id(&self.tenant, &self.project).await?;

        let groups: Vec<ExportGroup> = self
            .resolver
            .project_export_groups(&project_id)
            .await?
            .into_iter()
            .filter(|g| serves_ports(g, &ports))
            .collect();

        let remaining_volumes = groups
            .iter()
            .flat_map(|g| g.volumes.iter())
            .filter(|v| v.id != volume_id)
            .map(|v| v.id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let bound: Vec<&ExportGroup> = groups.iter().filter(|g| g.has_volume(volume_id)).collect();
        if bound.is_empty() {
            debug!("Volume {} is not exported to these initiators", volume_id);
            return Ok(DetachOutcome {
                itls: Vec::new(),
                remaining_volumes,
            });
        }

        let itls = filter_itls(self.client.volumes().exports(volume_id).await?, &ports);

        for group in bound {
            info!("Removing volume {} from export group {}", volume_id, group.name);
            let tasks = self
                .client
                .export_groups()
                .update(&group.id, &ExportUpdateParam::remove_volume(volume_id))
                .await?;
            self.waiter.wait_all_ready(&tasks).await?;
        }

        Ok(DetachOutcome {
            itls,
            remaining_volumes,
        })
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// First active export group in the project and varray holding any port
    async fn find_export_group(
        &self,
        project_id: &str,
        varray_id: &str,
        ports: &HashSet<String>,
    ) -> Result<Option<ExportGroup>> {
        let groups = self.resolver.project_export_groups(project_id).await?;
        Ok(groups.into_iter().find(|g| {
            let in_varray = g.varray.as_ref().map(|v| v.id == varray_id).unwrap_or(true);
            in_varray && serves_ports(g, ports)
        }))
    }

    /// Host already owning one of the ports
    async fn find_host_by_ports(&self, initiators: &[InitiatorSpec]) -> Result<Option<String>> {
        for spec in initiators {
            let ids = self.client.initiators().search_by_port(&spec.port).await?;
            for id in ids {
                if let Some(initiator) = self.client.initiators().show(&id).await? {
                    if let Some(host) = initiator.host {
                        return Ok(Some(host.id));
                    }
                }
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Creation
    // =========================================================================

    async fn create_host_export(
        &self,
        project_id: &str,
        varray_id: &str,
        protocol: Protocol,
        initiators: &[InitiatorSpec],
        ports: &HashSet<String>,
        hostname: &str,
    ) -> Result<ExportGroup> {
        let tenant_id = self.resolver.tenant_id(&self.tenant).await?;
        let host_id = self.ensure_host(&tenant_id, hostname, initiators).await?;
        self.register_initiators(&host_id, protocol, initiators).await?;

        let param = ExportCreateParam {
            name: format!("{}SG-{}", hostname, random_suffix()),
            project: project_id.to_string(),
            varray: varray_id.to_string(),
            export_type: ExportGroupType::Host,
            hosts: vec![host_id],
            volumes: Vec::new(),
        };
        info!("Creating export group {} for host {}", param.name, hostname);

        match self.client.export_groups().create(&param).await {
            Ok(tasks) => {
                let done = self.waiter.wait_all_ready(&tasks).await?;
                let group_id = done
                    .first()
                    .map(|t| t.resource.id.clone())
                    .ok_or_else(|| Error::Internal("export group create returned no task".into()))?;
                self.client
                    .export_groups()
                    .show(&group_id)
                    .await?
                    .ok_or_else(|| Error::not_found("export group", group_id))
            }
            Err(e) if e.is_conflict() => {
                warn!("Export group creation raced with another attach, looking up again: {}", e);
                self.find_export_group(project_id, varray_id, ports)
                    .await?
                    .ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Host owning the ports, else the host named `hostname`, else a new one
    async fn ensure_host(&self, tenant_id: &str, hostname: &str, initiators: &[InitiatorSpec]) -> Result<String> {
        if let Some(host_id) = self.find_host_by_ports(initiators).await? {
            debug!("Initiators of {} already registered under host {}", hostname, host_id);
            return Ok(host_id);
        }

        match self.resolver.host_id(tenant_id, hostname).await {
            Ok(host_id) => return Ok(host_id),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!("Creating host {}", hostname);
        let param = HostCreateParam {
            host_type: HOST_TYPE.to_string(),
            name: hostname.to_string(),
            host_name: hostname.to_string(),
            discoverable: false,
            project: None,
        };
        match self.client.hosts().create(tenant_id, &param).await {
            Ok(tasks) => {
                let done = self.waiter.wait_all_ready(&tasks).await?;
                done.first()
                    .map(|t| t.resource.id.clone())
                    .ok_or_else(|| Error::Internal("host create returned no task".into()))
            }
            Err(e) if e.is_conflict() => {
                warn!("Host {} created concurrently, looking up again", hostname);
                self.resolver.host_id(tenant_id, hostname).await
            }
            Err(e) => Err(e),
        }
    }

    /// Register every port the host does not know yet
    async fn register_initiators(&self, host_id: &str, protocol: Protocol, initiators: &[InitiatorSpec]) -> Result<()> {
        let listed = self.client.hosts().initiators(host_id).await?;
        let shown = try_join_all(listed.iter().map(|i| async move { self.client.initiators().show(&i.id).await }))
            .await?;
        let known: HashSet<String> = shown
            .into_iter()
            .flatten()
            .map(|i| normalize_port(&i.initiator_port))
            .collect();

        for spec in initiators {
            if known.contains(&normalize_port(&spec.port)) {
                continue;
            }
            info!("Registering initiator {} on host {}", spec.port, host_id);
            let param = InitiatorCreateParam {
                protocol: protocol.initiator_protocol(),
                initiator_port: spec.port.clone(),
                initiator_node: spec.node.clone(),
            };
            let tasks = self.client.initiators().create(host_id, &param).await?;
            self.waiter.wait_all_ready(&tasks).await?;
        }
        Ok(())
    }

    // =========================================================================
    // LUN Readiness
    // =========================================================================

    /// Poll the volume's ITLs until a LUN is assigned to the initiators.
    /// Only ITLs that already carry a LUN are returned.
    async fn wait_for_luns(&self, volume_id: &str, protocol: Protocol, ports: &HashSet<String>) -> Result<Vec<Itl>> {
        let poll = async {
            loop {
                let itls = self.client.volumes().exports(volume_id).await?;
                let ready = match protocol {
                    // SDC ids never appear as ITL initiator ports
                    Protocol::ScaleIo => (!itls.is_empty()).then_some(itls),
                    _ => {
                        let assigned: Vec<Itl> = filter_itls(itls, ports)
                            .into_iter()
                            .filter(|itl| itl.hlu >= 0)
                            .collect();
                        (!assigned.is_empty()).then_some(assigned)
                    }
                };
                if let Some(itls) = ready {
                    return Ok::<_, Error>(itls);
                }
                debug!("No LUN yet for volume {}", volume_id);
                tokio::time::sleep(self.lun_poll_interval).await;
            }
        };

        match tokio::time::timeout(self.attach_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(Error::TaskTimedOut {
                resource: volume_id.to_string(),
                operation: "export volume".to_string(),
                duration: format!("{:?}", self.attach_timeout),
            }),
        }
    }
}

fn serves_ports(group: &ExportGroup, ports: &HashSet<String>) -> bool {
    group
        .initiators
        .iter()
        .any(|i| ports.contains(&normalize_port(&i.initiator_port)))
}

/// ITLs whose initiator port belongs to the connector, in server order
pub fn filter_itls(itls: Vec<Itl>, ports: &HashSet<String>) -> Vec<Itl> {
    itls.into_iter()
        .filter(|itl| {
            itl.initiator
                .port
                .as_deref()
                .map(|p| ports.contains(&normalize_port(p)))
                .unwrap_or(false)
        })
        .collect()
}
