//! Resource Client
//!
//! Typed operations on each controller resource kind. Every call goes
//! through the [`AuthGate`] so an expired session is refreshed once, and
//! every mutating call clears the name-lookup cache.

pub mod consistency_group;
pub mod export_group;
pub mod host;
pub mod initiator;
pub mod project;
pub mod snapshot;
pub mod storage_system;
pub mod tenant;
pub mod varray;
pub mod volume;
pub mod vpool;

pub use consistency_group::ConsistencyGroupApi;
pub use export_group::ExportGroupApi;
pub use host::HostApi;
pub use initiator::InitiatorApi;
pub use project::ProjectApi;
pub use snapshot::{SnapshotApi, SnapshotParent};
pub use storage_system::StorageSystemApi;
pub use tenant::TenantApi;
pub use varray::VirtualArrayApi;
pub use volume::VolumeApi;
pub use vpool::VirtualPoolApi;

use crate::config::DriverConfig;
use crate::domain::model::{Task, TaskResponse};
use crate::error::Result;
use crate::metrics::DriverMetrics;
use crate::resolver::LookupCache;
use crate::transport::{Accept, AuthGate, RestResponse, RestTransport, Session, SessionRef};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

struct ClientInner {
    auth: AuthGate,
    metrics: DriverMetrics,
    cache: LookupCache,
}

/// Controller client shared by the resolver, the task waiter, the export
/// orchestrator and the driver facade. Cloning is cheap.
#[derive(Clone)]
pub struct ControllerClient {
    inner: Arc<ClientInner>,
}

impl ControllerClient {
    /// Build a client, adopting the token of an existing cookie file
    pub async fn connect(config: &DriverConfig) -> Result<Self> {
        let session = Session::load(config.cookie_file()).await?;
        Self::with_session(config, session)
    }

    /// Build a client around an existing session
    pub fn with_session(config: &DriverConfig, session: SessionRef) -> Result<Self> {
        let metrics = DriverMetrics::new();
        let transport = RestTransport::new(config, session, metrics.clone())?;
        let auth = AuthGate::new(transport, config.username.clone(), config.password.clone());
        Ok(Self {
            inner: Arc::new(ClientInner {
                auth,
                metrics,
                cache: LookupCache::new(config.resolver_cache_ttl()),
            }),
        })
    }

    pub fn session(&self) -> &SessionRef {
        self.inner.auth.transport().session()
    }

    pub fn metrics(&self) -> &DriverMetrics {
        &self.inner.metrics
    }

    pub fn cache(&self) -> &LookupCache {
        &self.inner.cache
    }

    /// Log in now rather than on the first call
    pub async fn authenticate(&self) -> Result<String> {
        self.inner.auth.authenticate().await
    }

    pub async fn logout(&self) -> Result<()> {
        self.inner.auth.logout().await
    }

    // =========================================================================
    // Resource Accessors
    // =========================================================================

    pub fn tenants(&self) -> TenantApi<'_> {
        TenantApi::new(self)
    }

    pub fn projects(&self) -> ProjectApi<'_> {
        ProjectApi::new(self)
    }

    pub fn varrays(&self) -> VirtualArrayApi<'_> {
        VirtualArrayApi::new(self)
    }

    pub fn vpools(&self) -> VirtualPoolApi<'_> {
        VirtualPoolApi::new(self)
    }

    pub fn storage_systems(&self) -> StorageSystemApi<'_> {
        StorageSystemApi::new(self)
    }

    pub fn volumes(&self) -> VolumeApi<'_> {
        VolumeApi::new(self)
    }

    pub fn snapshots(&self) -> SnapshotApi<'_> {
        SnapshotApi::new(self)
    }

    pub fn consistency_groups(&self) -> ConsistencyGroupApi<'_> {
        ConsistencyGroupApi::new(self)
    }

    pub fn hosts(&self) -> HostApi<'_> {
        HostApi::new(self)
    }

    pub fn initiators(&self) -> InitiatorApi<'_> {
        InitiatorApi::new(self)
    }

    pub fn export_groups(&self) -> ExportGroupApi<'_> {
        ExportGroupApi::new(self)
    }

    // =========================================================================
    // Request Helpers
    // =========================================================================

    /// Issue an authenticated request. Anything but a GET clears the lookup
    /// cache, whatever the outcome.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<RestResponse> {
        let transport = self.inner.auth.transport();
        let result = self
            .inner
            .auth
            .call(|| transport.request(method.clone(), path, body.as_ref(), Accept::Json))
            .await;
        if method != Method::GET {
            self.inner.cache.clear();
        }
        result
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(Method::GET, path, None).await?.json()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.send(Method::POST, path, Some(body)).await?.json()
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.send(Method::PUT, path, Some(body)).await?.json()
    }

    /// POST returning a task or a task bundle
    pub async fn post_tasks<B: Serialize + ?Sized>(&self, path: &str, body: Option<&B>) -> Result<Vec<Task>> {
        let body = body.map(serde_json::to_value).transpose()?;
        let response: TaskResponse = self.send(Method::POST, path, body).await?.json()?;
        Ok(response.into_tasks())
    }

    /// PUT returning a task or a task bundle
    pub async fn put_tasks<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Vec<Task>> {
        let body = serde_json::to_value(body)?;
        let response: TaskResponse = self.send(Method::PUT, path, Some(body)).await?.json()?;
        Ok(response.into_tasks())
    }
}

/// Percent-encode a query value
pub(crate) fn query(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
