//! Block volume API
//!
//! Creation, expansion, deactivation, tags, full copies, virtual-pool
//! change, and the ITLs of an exported volume.

use crate::client::{query, ControllerClient};
use crate::domain::model::{
    BulkIdParam, FullCopyParam, Itl, ItlList, SearchResults, TagChanges, TagList, Task,
    TaskList, Volume, VolumeCreateParam, VolumeExpandParam, VpoolChangeParam,
};
use crate::error::Result;
use reqwest::Method;
use tracing::debug;

/// Block volume operations
pub struct VolumeApi<'a> {
    client: &'a ControllerClient,
}

impl<'a> VolumeApi<'a> {
    pub(crate) fn new(client: &'a ControllerClient) -> Self {
        Self { client }
    }

    /// `POST /block/volumes`
    pub async fn create(&self, param: &VolumeCreateParam) -> Result<Vec<Task>> {
        debug!("Creating volume {} ({} bytes)", param.name, param.size);
        self.client.post_tasks("/block/volumes", Some(param)).await
    }

    /// Volume by id; `None` once deactivated
    pub async fn show(&self, id: &str) -> Result<Option<Volume>> {
        let volume: Volume = self.client.get(&format!("/block/volumes/{}", id)).await?;
        Ok((!volume.inactive).then_some(volume))
    }

    /// Volume by id including deactivated ones
    pub async fn show_any(&self, id: &str) -> Result<Volume> {
        self.client.get(&format!("/block/volumes/{}", id)).await
    }

    /// Ids of the volumes in a project
    pub async fn search_by_project(&self, project_id: &str) -> Result<Vec<String>> {
        let results: SearchResults = self
            .client
            .get(&format!("/block/volumes/search?project={}", query(project_id)))
            .await?;
        Ok(results.ids())
    }

    pub async fn deactivate(&self, id: &str) -> Result<Vec<Task>> {
        self.client
            .post_tasks(&format!("/block/volumes/{}/deactivate", id), None::<&()>)
            .await
    }

    /// Deactivate several volumes with one request
    pub async fn deactivate_bulk(&self, ids: &[String]) -> Result<Vec<Task>> {
        let param = BulkIdParam { id: ids.to_vec() };
        self.client.post_tasks("/block/volumes/deactivate", Some(&param)).await
    }

    pub async fn expand(&self, id: &str, new_size_bytes: u64) -> Result<Vec<Task>> {
        let param = VolumeExpandParam {
            new_size: new_size_bytes.to_string(),
        };
        self.client
            .post_tasks(&format!("/block/volumes/{}/expand", id), Some(&param))
            .await
    }

    /// ITLs of the volume's exports
    pub async fn exports(&self, id: &str) -> Result<Vec<Itl>> {
        let list: ItlList = self.client.get(&format!("/block/volumes/{}/exports", id)).await?;
        Ok(list.itl)
    }

    pub async fn tags(&self, id: &str) -> Result<Vec<String>> {
        let list: TagList = self.client.get(&format!("/block/volumes/{}/tags", id)).await?;
        Ok(list.tag)
    }

    /// Add and remove tags in one request
    pub async fn update_tags(&self, id: &str, changes: &TagChanges) -> Result<()> {
        let body = serde_json::to_value(changes)?;
        self.client
            .send(Method::PUT, &format!("/block/volumes/{}/tags", id), Some(body))
            .await?;
        Ok(())
    }

    pub async fn tasks(&self, id: &str) -> Result<Vec<Task>> {
        let list: TaskList = self.client.get(&format!("/block/volumes/{}/tasks", id)).await?;
        Ok(list.task)
    }

    pub async fn task(&self, id: &str, op_id: &str) -> Result<Task> {
        self.client
            .get(&format!("/block/volumes/{}/tasks/{}", id, op_id))
            .await
    }

    /// Full copy (clone) of a volume
    pub async fn full_copy(&self, source_id: &str, param: &FullCopyParam) -> Result<Vec<Task>> {
        self.client
            .post_tasks(
                &format!("/block/volumes/{}/protection/full-copies", source_id),
                Some(param),
            )
            .await
    }

    /// Break the relationship between a full copy and its source
    pub async fn detach_full_copy(&self, source_id: &str, copy_id: &str) -> Result<Vec<Task>> {
        self.client
            .post_tasks(
                &format!(
                    "/block/volumes/{}/protection/full-copies/{}/detach",
                    source_id, copy_id
                ),
                None::<&()>,
            )
            .await
    }

    /// Move volumes to another virtual pool
    pub async fn change_vpool(&self, ids: &[String], vpool_id: &str) -> Result<Vec<Task>> {
        let param = VpoolChangeParam {
            volumes: ids.to_vec(),
            vpool: vpool_id.to_string(),
        };
        self.client
            .post_tasks("/block/volumes/vpool-change", Some(&param))
            .await
    }
}
