//! Virtual array API

use crate::client::ControllerClient;
use crate::domain::model::{NamedRelatedResource, VirtualArray, VirtualArrayList};
use crate::error::Result;

pub struct VirtualArrayApi<'a> {
    client: &'a ControllerClient,
}

impl<'a> VirtualArrayApi<'a> {
    pub(crate) fn new(client: &'a ControllerClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<NamedRelatedResource>> {
        let list: VirtualArrayList = self.client.get("/vdc/varrays").await?;
        Ok(list.varray)
    }

    pub async fn show(&self, id: &str) -> Result<Option<VirtualArray>> {
        let varray: VirtualArray = self.client.get(&format!("/vdc/varrays/{}", id)).await?;
        Ok((!varray.inactive).then_some(varray))
    }
}
