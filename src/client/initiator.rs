//! Initiator API

use crate::client::{query, ControllerClient};
use crate::domain::model::{Initiator, InitiatorCreateParam, SearchResults, Task};
use crate::error::Result;

pub struct InitiatorApi<'a> {
    client: &'a ControllerClient,
}

impl<'a> InitiatorApi<'a> {
    pub(crate) fn new(client: &'a ControllerClient) -> Self {
        Self { client }
    }

    pub async fn show(&self, id: &str) -> Result<Option<Initiator>> {
        let initiator: Initiator = self.client.get(&format!("/compute/initiators/{}", id)).await?;
        Ok((!initiator.inactive).then_some(initiator))
    }

    /// Ids of initiators registered with a port
    pub async fn search_by_port(&self, port: &str) -> Result<Vec<String>> {
        let results: SearchResults = self
            .client
            .get(&format!(
                "/compute/initiators/search?initiator_port={}",
                query(port)
            ))
            .await?;
        Ok(results.ids())
    }

    /// Register an initiator under a host
    pub async fn create(&self, host_id: &str, param: &InitiatorCreateParam) -> Result<Vec<Task>> {
        self.client
            .post_tasks(&format!("/compute/hosts/{}/initiators", host_id), Some(param))
            .await
    }
}
