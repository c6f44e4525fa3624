//! Tenant API

use crate::client::ControllerClient;
use crate::domain::model::{NamedRelatedResource, ProjectList, SubtenantList, Tenant};
use crate::error::Result;

/// Tenant operations
pub struct TenantApi<'a> {
    client: &'a ControllerClient,
}

impl<'a> TenantApi<'a> {
    pub(crate) fn new(client: &'a ControllerClient) -> Self {
        Self { client }
    }

    /// Tenant of the authenticated user
    pub async fn current(&self) -> Result<Tenant> {
        self.client.get("/tenant").await
    }

    pub async fn show(&self, id: &str) -> Result<Option<Tenant>> {
        let tenant: Tenant = self.client.get(&format!("/tenants/{}", id)).await?;
        Ok((!tenant.inactive).then_some(tenant))
    }

    pub async fn subtenants(&self, id: &str) -> Result<Vec<NamedRelatedResource>> {
        let list: SubtenantList = self.client.get(&format!("/tenants/{}/subtenants", id)).await?;
        Ok(list.subtenant)
    }

    pub async fn projects(&self, id: &str) -> Result<Vec<NamedRelatedResource>> {
        let list: ProjectList = self.client.get(&format!("/tenants/{}/projects", id)).await?;
        Ok(list.project)
    }
}
