//! Name Resolver
//!
//! Maps hierarchical names such as `tenant/project/volume` to opaque
//! controller ids. Lookups are cached for a short TTL per
//! (kind, parent id, name); every mutating request through the owning
//! client clears the cache.

use crate::client::{ControllerClient, SnapshotParent};
use crate::domain::model::{ExportGroup, Volume};
use crate::error::{Error, Result};
use dashmap::DashMap;
use futures::future::try_join_all;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Prefix of controller-issued resource ids
pub const URN_PREFIX: &str = "urn:storageos:";

/// Resource kinds the resolver knows how to look up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Tenant,
    Project,
    Volume,
    Snapshot,
    ConsistencyGroup,
    ExportGroup,
    Host,
    VirtualArray,
    VirtualPool,
    StorageSystem,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Tenant => "tenant",
            ResourceKind::Project => "project",
            ResourceKind::Volume => "volume",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::ConsistencyGroup => "consistency group",
            ResourceKind::ExportGroup => "export group",
            ResourceKind::Host => "host",
            ResourceKind::VirtualArray => "varray",
            ResourceKind::VirtualPool => "vpool",
            ResourceKind::StorageSystem => "storage system",
        }
    }

    /// Number of path segments between the project and the leaf
    fn parent_depth(&self) -> usize {
        match self {
            ResourceKind::Snapshot => 1,
            _ => 0,
        }
    }

    fn requires_project(&self) -> bool {
        matches!(
            self,
            ResourceKind::Volume
                | ResourceKind::Snapshot
                | ResourceKind::ConsistencyGroup
                | ResourceKind::ExportGroup
        )
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant segment of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantRef {
    /// Tenant of the authenticated user
    Current,
    Named(String),
}

impl TenantRef {
    /// Empty name means the current tenant
    pub fn from_name(name: &str) -> Self {
        if name.trim().is_empty() {
            TenantRef::Current
        } else {
            TenantRef::Named(name.to_string())
        }
    }
}

/// Parsed hierarchical name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    pub tenant: TenantRef,
    pub project: Option<String>,
    /// Intermediate parents, e.g. the volume of a snapshot
    pub parents: Vec<String>,
    pub name: String,
}

impl ResourcePath {
    /// Path of a resource directly inside a project
    pub fn in_project(tenant: TenantRef, project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant,
            project: Some(project.into()),
            parents: Vec::new(),
            name: name.into(),
        }
    }

    /// Parse `[tenant/]project/[parents/]name` for the given kind
    pub fn parse(kind: ResourceKind, path: &str) -> Result<Self> {
        let segments: Vec<&str> = path.split('/').collect();
        let leaf = segments.last().copied().unwrap_or_default();

        match kind {
            ResourceKind::Tenant => Ok(Self {
                tenant: TenantRef::from_name(path),
                project: None,
                parents: Vec::new(),
                name: path.to_string(),
            }),
            ResourceKind::VirtualArray | ResourceKind::VirtualPool | ResourceKind::StorageSystem => {
                if segments.len() != 1 || leaf.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "{} names are global, got '{}'",
                        kind, path
                    )));
                }
                Ok(Self {
                    tenant: TenantRef::Current,
                    project: None,
                    parents: Vec::new(),
                    name: leaf.to_string(),
                })
            }
            ResourceKind::Project | ResourceKind::Host => {
                let tenant = match segments.len() {
                    1 => TenantRef::Current,
                    2 => TenantRef::from_name(segments[0]),
                    _ => {
                        return Err(Error::InvalidInput(format!(
                            "expected [tenant/]name for {}, got '{}'",
                            kind, path
                        )))
                    }
                };
                if leaf.is_empty() {
                    return Err(Error::InvalidInput(format!("empty {} name", kind)));
                }
                Ok(Self {
                    tenant,
                    project: None,
                    parents: Vec::new(),
                    name: leaf.to_string(),
                })
            }
            _ => {
                let depth = kind.parent_depth();
                // project + parents + leaf, optionally preceded by the tenant
                let minimum = 2 + depth;
                if segments.len() < minimum {
                    return Err(Error::InvalidInput(format!(
                        "{} '{}' requires a project{}",
                        kind,
                        path,
                        if depth > 0 { " and a parent volume" } else { "" }
                    )));
                }
                if segments.len() > minimum + 1 {
                    return Err(Error::InvalidInput(format!(
                        "too many segments in {} path '{}'",
                        kind, path
                    )));
                }
                let (tenant, rest) = if segments.len() == minimum + 1 {
                    (TenantRef::from_name(segments[0]), &segments[1..])
                } else {
                    (TenantRef::Current, &segments[..])
                };
                if rest.iter().any(|s| s.is_empty()) {
                    return Err(Error::InvalidInput(format!("empty segment in '{}'", path)));
                }
                Ok(Self {
                    tenant,
                    project: Some(rest[0].to_string()),
                    parents: rest[1..rest.len() - 1].iter().map(|s| s.to_string()).collect(),
                    name: leaf.to_string(),
                })
            }
        }
    }
}

/// Check if a string is already a controller id
pub fn is_resource_id(value: &str) -> bool {
    value.starts_with(URN_PREFIX) || uuid::Uuid::parse_str(value).is_ok()
}

// =============================================================================
// Lookup Cache
// =============================================================================

type CacheKey = (ResourceKind, String, String);

/// TTL cache of resolved ids
pub struct LookupCache {
    entries: DashMap<CacheKey, (String, Instant)>,
    ttl: Duration,
}

impl LookupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, kind: ResourceKind, parent: &str, name: &str) -> Option<String> {
        let key = (kind, parent.to_string(), name.to_string());
        let hit = self
            .entries
            .get(&key)
            .map(|entry| (entry.0.clone(), entry.1.elapsed() < self.ttl));
        match hit {
            Some((id, true)) => Some(id),
            Some((_, false)) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, kind: ResourceKind, parent: &str, name: &str, id: &str) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries
            .insert((kind, parent.to_string(), name.to_string()), (id.to_string(), Instant::now()));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Hierarchical name resolver bound to one client
#[derive(Clone)]
pub struct Resolver {
    client: ControllerClient,
}

impl Resolver {
    pub fn new(client: ControllerClient) -> Self {
        Self { client }
    }

    /// Resolve a textual path; ids are returned verbatim
    pub async fn resolve_str(&self, kind: ResourceKind, path: &str) -> Result<String> {
        if is_resource_id(path) {
            return Ok(path.to_string());
        }
        let path = ResourcePath::parse(kind, path)?;
        self.resolve(kind, &path).await
    }

    /// Resolve a parsed path to an id
    pub async fn resolve(&self, kind: ResourceKind, path: &ResourcePath) -> Result<String> {
        if is_resource_id(&path.name) {
            return Ok(path.name.clone());
        }

        match kind {
            ResourceKind::Tenant => self.tenant_id(&path.tenant).await,
            ResourceKind::Project => self.project_id(&path.tenant, &path.name).await,
            ResourceKind::Host => {
                let tenant_id = self.tenant_id(&path.tenant).await?;
                self.host_id(&tenant_id, &path.name).await
            }
            ResourceKind::VirtualArray => self.varray_id(&path.name).await,
            ResourceKind::VirtualPool => self.vpool_id(&path.name).await,
            ResourceKind::StorageSystem => self.storage_system_id(&path.name).await,
            _ if kind.requires_project() => {
                let project = path.project.as_deref().ok_or_else(|| {
                    Error::InvalidInput(format!("{} '{}' requires a project", kind, path.name))
                })?;
                let project_id = self.project_id(&path.tenant, project).await?;
                match kind {
                    ResourceKind::Volume => self.volume_id(&project_id, &path.name).await,
                    ResourceKind::ConsistencyGroup => {
                        self.consistency_group_id(&project_id, &path.name).await
                    }
                    ResourceKind::ExportGroup => self.export_group_id(&project_id, &path.name).await,
                    ResourceKind::Snapshot => {
                        let volume = path.parents.first().ok_or_else(|| {
                            Error::InvalidInput(format!(
                                "snapshot '{}' requires a parent volume",
                                path.name
                            ))
                        })?;
                        let volume_id = self.volume_id(&project_id, volume).await?;
                        self.snapshot_id(&volume_id, &path.name).await
                    }
                    _ => Err(Error::Internal(format!("unhandled resource kind {}", kind))),
                }
            }
            _ => Err(Error::Internal(format!("unhandled resource kind {}", kind))),
        }
    }

    async fn cached<F, Fut>(&self, kind: ResourceKind, parent: &str, name: &str, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>>>,
    {
        if let Some(id) = self.client.cache().get(kind, parent, name) {
            return Ok(id);
        }
        match fetch().await? {
            Some(id) => {
                debug!("Resolved {} '{}' to {}", kind, name, id);
                self.client.cache().insert(kind, parent, name, &id);
                Ok(id)
            }
            None => Err(Error::not_found(kind.as_str(), name)),
        }
    }

    // =========================================================================
    // Tenancy
    // =========================================================================

    pub async fn tenant_id(&self, tenant: &TenantRef) -> Result<String> {
        match tenant {
            TenantRef::Current => {
                self.cached(ResourceKind::Tenant, "", "", || async move {
                    Ok(Some(self.client.tenants().current().await?.id))
                })
                .await
            }
            TenantRef::Named(name) if is_resource_id(name) => Ok(name.clone()),
            TenantRef::Named(name) => {
                self.cached(ResourceKind::Tenant, "", name, || async move {
                    let root = self.client.tenants().current().await?;
                    if &root.name == name {
                        return Ok(Some(root.id));
                    }
                    let subtenants = self.client.tenants().subtenants(&root.id).await?;
                    Ok(find_named(&subtenants, name))
                })
                .await
            }
        }
    }

    pub async fn project_id(&self, tenant: &TenantRef, name: &str) -> Result<String> {
        if is_resource_id(name) {
            return Ok(name.to_string());
        }
        let tenant_id = self.tenant_id(tenant).await?;
        let tenant_id = tenant_id.as_str();
        self.cached(ResourceKind::Project, tenant_id, name, || async move {
            let projects = self.client.tenants().projects(tenant_id).await?;
            Ok(find_named(&projects, name))
        })
        .await
    }

    // =========================================================================
    // Project-scoped Kinds
    // =========================================================================

    pub async fn volume_id(&self, project_id: &str, name: &str) -> Result<String> {
        if is_resource_id(name) {
            return Ok(name.to_string());
        }
        self.cached(ResourceKind::Volume, project_id, name, || async move {
            Ok(self.find_volume(project_id, name).await?.map(|v| v.id))
        })
        .await
    }

    /// First active volume with the name, in listing order
    pub async fn find_volume(&self, project_id: &str, name: &str) -> Result<Option<Volume>> {
        let volumes = self.project_volumes(project_id).await?;
        Ok(volumes.into_iter().find(|v| v.name == name && !v.inactive))
    }

    /// Every volume of a project, including deactivated ones
    pub async fn project_volumes(&self, project_id: &str) -> Result<Vec<Volume>> {
        let ids = self.client.volumes().search_by_project(project_id).await?;
        let volumes = try_join_all(ids.iter().map(|id| async move {
            match self.client.volumes().show_any(id).await {
                Ok(volume) => Ok(Some(volume)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        }))
        .await?;
        Ok(volumes.into_iter().flatten().collect())
    }

    /// Fail with `AlreadyExists` when the name is taken in the project.
    ///
    /// A deactivated volume only frees its name once its latest task is
    /// inactive as well.
    pub async fn ensure_volume_absent(&self, project_id: &str, name: &str) -> Result<()> {
        let volumes = self.project_volumes(project_id).await?;
        for volume in volumes.iter().filter(|v| v.name == name) {
            if !volume.inactive {
                return Err(Error::AlreadyExists {
                    kind: "volume".into(),
                    name: name.to_string(),
                });
            }
            let tasks = self.client.volumes().tasks(&volume.id).await?;
            let latest_inactive = tasks.last().map(|t| t.inactive).unwrap_or(true);
            if !latest_inactive {
                return Err(Error::AlreadyExists {
                    kind: "volume".into(),
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    pub async fn snapshot_id(&self, volume_id: &str, name: &str) -> Result<String> {
        if is_resource_id(name) {
            return Ok(name.to_string());
        }
        self.cached(ResourceKind::Snapshot, volume_id, name, || async move {
            let snapshots = self
                .client
                .snapshots()
                .list(SnapshotParent::Volume, volume_id)
                .await?;
            Ok(find_named(&snapshots, name))
        })
        .await
    }

    pub async fn consistency_group_id(&self, project_id: &str, name: &str) -> Result<String> {
        if is_resource_id(name) {
            return Ok(name.to_string());
        }
        self.cached(ResourceKind::ConsistencyGroup, project_id, name, || async move {
            let resources = self.client.projects().resources(project_id).await?;
            Ok(resources
                .into_iter()
                .find(|r| r.resource_type == "block_consistency_group" && r.name == name)
                .map(|r| r.id))
        })
        .await
    }

    pub async fn export_group_id(&self, project_id: &str, name: &str) -> Result<String> {
        if is_resource_id(name) {
            return Ok(name.to_string());
        }
        self.cached(ResourceKind::ExportGroup, project_id, name, || async move {
            let groups = self.project_export_groups(project_id).await?;
            Ok(groups.into_iter().find(|g| g.name == name).map(|g| g.id))
        })
        .await
    }

    /// Active export groups of a project, in listing order
    pub async fn project_export_groups(&self, project_id: &str) -> Result<Vec<ExportGroup>> {
        let ids = self.client.export_groups().search_by_project(project_id).await?;
        // A group removed between the search and the show is skipped
        let groups = try_join_all(ids.iter().map(|id| async move {
            match self.client.export_groups().show(id).await {
                Err(e) if e.is_not_found() => Ok(None),
                other => other,
            }
        }))
        .await?;
        Ok(groups.into_iter().flatten().collect())
    }

    // =========================================================================
    // Tenant-scoped and Global Kinds
    // =========================================================================

    pub async fn host_id(&self, tenant_id: &str, name: &str) -> Result<String> {
        if is_resource_id(name) {
            return Ok(name.to_string());
        }
        self.cached(ResourceKind::Host, tenant_id, name, || async move {
            let hosts = self.client.hosts().list(tenant_id).await?;
            Ok(find_named(&hosts, name))
        })
        .await
    }

    pub async fn varray_id(&self, name: &str) -> Result<String> {
        if is_resource_id(name) {
            return Ok(name.to_string());
        }
        self.cached(ResourceKind::VirtualArray, "", name, || async move {
            let varrays = self.client.varrays().list().await?;
            Ok(find_named(&varrays, name))
        })
        .await
    }

    pub async fn vpool_id(&self, name: &str) -> Result<String> {
        if is_resource_id(name) {
            return Ok(name.to_string());
        }
        self.cached(ResourceKind::VirtualPool, "", name, || async move {
            let vpools = self.client.vpools().list().await?;
            Ok(find_named(&vpools, name))
        })
        .await
    }

    pub async fn storage_system_id(&self, name: &str) -> Result<String> {
        if is_resource_id(name) {
            return Ok(name.to_string());
        }
        self.cached(ResourceKind::StorageSystem, "", name, || async move {
            let systems = self.client.storage_systems().list().await?;
            Ok(find_named(&systems, name))
        })
        .await
    }
}

fn find_named(items: &[crate::domain::model::NamedRelatedResource], name: &str) -> Option<String> {
    items
        .iter()
        .find(|item| item.name.as_deref() == Some(name))
        .map(|item| item.id.clone())
}
