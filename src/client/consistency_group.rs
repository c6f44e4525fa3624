//! Consistency group API

use crate::client::ControllerClient;
use crate::domain::model::{
    ConsistencyGroup, ConsistencyGroupCreateParam, ConsistencyGroupUpdateParam,
    NamedRelatedResource, SnapshotCreateParam, SnapshotList, Task, VolumeIdList,
};
use crate::error::Result;

pub struct ConsistencyGroupApi<'a> {
    client: &'a ControllerClient,
}

impl<'a> ConsistencyGroupApi<'a> {
    pub(crate) fn new(client: &'a ControllerClient) -> Self {
        Self { client }
    }

    /// Groups are created synchronously
    pub async fn create(&self, name: &str, project_id: &str) -> Result<ConsistencyGroup> {
        let param = ConsistencyGroupCreateParam {
            name: name.to_string(),
            project: project_id.to_string(),
        };
        self.client.post("/block/consistency-groups", &param).await
    }

    pub async fn show(&self, id: &str) -> Result<Option<ConsistencyGroup>> {
        let group: ConsistencyGroup = self
            .client
            .get(&format!("/block/consistency-groups/{}", id))
            .await?;
        Ok((!group.inactive).then_some(group))
    }

    /// Add and remove member volumes
    pub async fn update(&self, id: &str, add: &[String], remove: &[String]) -> Result<Vec<Task>> {
        let param = ConsistencyGroupUpdateParam {
            add_volumes: (!add.is_empty()).then(|| VolumeIdList { volume: add.to_vec() }),
            remove_volumes: (!remove.is_empty()).then(|| VolumeIdList {
                volume: remove.to_vec(),
            }),
        };
        self.client
            .put_tasks(&format!("/block/consistency-groups/{}", id), &param)
            .await
    }

    pub async fn deactivate(&self, id: &str) -> Result<Vec<Task>> {
        self.client
            .post_tasks(
                &format!("/block/consistency-groups/{}/deactivate", id),
                None::<&()>,
            )
            .await
    }

    pub async fn snapshots(&self, id: &str) -> Result<Vec<NamedRelatedResource>> {
        let list: SnapshotList = self
            .client
            .get(&format!("/block/consistency-groups/{}/protection/snapshots", id))
            .await?;
        Ok(list.snapshot)
    }

    pub async fn create_snapshot(&self, id: &str, name: &str) -> Result<Vec<Task>> {
        let param = SnapshotCreateParam {
            name: name.to_string(),
            create_inactive: false,
            read_only: false,
        };
        self.client
            .post_tasks(
                &format!("/block/consistency-groups/{}/protection/snapshots", id),
                Some(&param),
            )
            .await
    }

    pub async fn deactivate_snapshot(&self, id: &str, snapshot_id: &str) -> Result<Vec<Task>> {
        self.client
            .post_tasks(
                &format!(
                    "/block/consistency-groups/{}/protection/snapshots/{}/deactivate",
                    id, snapshot_id
                ),
                None::<&()>,
            )
            .await
    }
}
