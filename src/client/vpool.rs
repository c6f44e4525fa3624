//! Block virtual pool API

use crate::client::ControllerClient;
use crate::domain::model::{NamedRelatedResource, VirtualPool, VirtualPoolList, VpoolCapacity};
use crate::error::Result;

pub struct VirtualPoolApi<'a> {
    client: &'a ControllerClient,
}

impl<'a> VirtualPoolApi<'a> {
    pub(crate) fn new(client: &'a ControllerClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<NamedRelatedResource>> {
        let list: VirtualPoolList = self.client.get("/block/vpools").await?;
        Ok(list.virtualpool)
    }

    pub async fn show(&self, id: &str) -> Result<Option<VirtualPool>> {
        let vpool: VirtualPool = self.client.get(&format!("/block/vpools/{}", id)).await?;
        Ok((!vpool.inactive).then_some(vpool))
    }

    /// Capacity of a virtual pool within one virtual array
    pub async fn capacity(&self, vpool_id: &str, varray_id: &str) -> Result<VpoolCapacity> {
        self.client
            .get(&format!("/block/vpools/{}/varrays/{}/capacity", vpool_id, varray_id))
            .await
    }
}
