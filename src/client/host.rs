//! Compute host API

use crate::client::ControllerClient;
use crate::domain::model::{
    Host, HostCreateParam, HostList, InitiatorList, Itl, ItlList, NamedRelatedResource, Task,
};
use crate::error::Result;

pub struct HostApi<'a> {
    client: &'a ControllerClient,
}

impl<'a> HostApi<'a> {
    pub(crate) fn new(client: &'a ControllerClient) -> Self {
        Self { client }
    }

    /// Hosts registered under a tenant
    pub async fn list(&self, tenant_id: &str) -> Result<Vec<NamedRelatedResource>> {
        let list: HostList = self.client.get(&format!("/tenants/{}/hosts", tenant_id)).await?;
        Ok(list.host)
    }

    pub async fn show(&self, id: &str) -> Result<Option<Host>> {
        let host: Host = self.client.get(&format!("/compute/hosts/{}", id)).await?;
        Ok((!host.inactive).then_some(host))
    }

    pub async fn create(&self, tenant_id: &str, param: &HostCreateParam) -> Result<Vec<Task>> {
        self.client
            .post_tasks(&format!("/tenants/{}/hosts", tenant_id), Some(param))
            .await
    }

    pub async fn initiators(&self, id: &str) -> Result<Vec<NamedRelatedResource>> {
        let list: InitiatorList = self
            .client
            .get(&format!("/compute/hosts/{}/initiators", id))
            .await?;
        Ok(list.initiator)
    }

    /// ITLs of every volume exported to the host
    pub async fn exports(&self, id: &str) -> Result<Vec<Itl>> {
        let list: ItlList = self.client.get(&format!("/compute/hosts/{}/exports", id)).await?;
        Ok(list.itl)
    }
}
