//! Export group API
//!
//! Export groups bind volumes to initiators, hosts or clusters within one
//! virtual array. Membership changes are expressed as change-sets.

use crate::client::{query, ControllerClient};
use crate::domain::model::{ExportCreateParam, ExportGroup, ExportUpdateParam, SearchResults, Task};
use crate::error::Result;
use tracing::debug;

pub struct ExportGroupApi<'a> {
    client: &'a ControllerClient,
}

impl<'a> ExportGroupApi<'a> {
    pub(crate) fn new(client: &'a ControllerClient) -> Self {
        Self { client }
    }

    pub async fn search_by_project(&self, project_id: &str) -> Result<Vec<String>> {
        let results: SearchResults = self
            .client
            .get(&format!("/block/exports/search?project={}", query(project_id)))
            .await?;
        Ok(results.ids())
    }

    pub async fn show(&self, id: &str) -> Result<Option<ExportGroup>> {
        let group: ExportGroup = self.client.get(&format!("/block/exports/{}", id)).await?;
        Ok((!group.inactive).then_some(group))
    }

    pub async fn create(&self, param: &ExportCreateParam) -> Result<Vec<Task>> {
        debug!("Creating export group {}", param.name);
        self.client.post_tasks("/block/exports", Some(param)).await
    }

    /// Apply volume, initiator, host or cluster change-sets
    pub async fn update(&self, id: &str, changes: &ExportUpdateParam) -> Result<Vec<Task>> {
        self.client
            .put_tasks(&format!("/block/exports/{}", id), changes)
            .await
    }

    pub async fn deactivate(&self, id: &str) -> Result<Vec<Task>> {
        self.client
            .post_tasks(&format!("/block/exports/{}/deactivate", id), None::<&()>)
            .await
    }
}
