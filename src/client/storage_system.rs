//! Storage system API

use crate::client::ControllerClient;
use crate::domain::model::{NamedRelatedResource, StorageSystem, StorageSystemList};
use crate::error::Result;

pub struct StorageSystemApi<'a> {
    client: &'a ControllerClient,
}

impl<'a> StorageSystemApi<'a> {
    pub(crate) fn new(client: &'a ControllerClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<NamedRelatedResource>> {
        let list: StorageSystemList = self.client.get("/vdc/storage-systems").await?;
        Ok(list.storage_system)
    }

    pub async fn show(&self, id: &str) -> Result<Option<StorageSystem>> {
        let system: StorageSystem = self.client.get(&format!("/vdc/storage-systems/{}", id)).await?;
        Ok((!system.inactive).then_some(system))
    }
}
