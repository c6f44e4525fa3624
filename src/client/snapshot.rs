//! Snapshot API
//!
//! Snapshots hang off a block volume, a file system or a consistency group;
//! the parent decides the URI family.

use crate::client::ControllerClient;
use crate::domain::model::{
    FullCopyParam, NamedRelatedResource, Snapshot, SnapshotCreateParam, SnapshotList, Task,
};
use crate::error::Result;

/// Resource a snapshot is taken of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotParent {
    Volume,
    FileSystem,
    ConsistencyGroup,
}

impl SnapshotParent {
    /// URI prefix of the parent collection
    pub fn parent_path(&self) -> &'static str {
        match self {
            SnapshotParent::Volume => "/block/volumes",
            SnapshotParent::FileSystem => "/file/filesystems",
            SnapshotParent::ConsistencyGroup => "/block/consistency-groups",
        }
    }

    /// URI prefix of the snapshots themselves
    pub fn snapshot_path(&self) -> &'static str {
        match self {
            SnapshotParent::FileSystem => "/file/snapshots",
            SnapshotParent::Volume | SnapshotParent::ConsistencyGroup => "/block/snapshots",
        }
    }
}

/// Snapshot operations
pub struct SnapshotApi<'a> {
    client: &'a ControllerClient,
}

impl<'a> SnapshotApi<'a> {
    pub(crate) fn new(client: &'a ControllerClient) -> Self {
        Self { client }
    }

    pub async fn create(
        &self,
        parent: SnapshotParent,
        parent_id: &str,
        name: &str,
    ) -> Result<Vec<Task>> {
        let param = SnapshotCreateParam {
            name: name.to_string(),
            create_inactive: false,
            read_only: false,
        };
        self.client
            .post_tasks(
                &format!("{}/{}/protection/snapshots", parent.parent_path(), parent_id),
                Some(&param),
            )
            .await
    }

    /// Snapshots of a parent resource
    pub async fn list(&self, parent: SnapshotParent, parent_id: &str) -> Result<Vec<NamedRelatedResource>> {
        let list: SnapshotList = self
            .client
            .get(&format!("{}/{}/protection/snapshots", parent.parent_path(), parent_id))
            .await?;
        Ok(list.snapshot)
    }

    pub async fn show(&self, parent: SnapshotParent, id: &str) -> Result<Option<Snapshot>> {
        let snapshot: Snapshot = self
            .client
            .get(&format!("{}/{}", parent.snapshot_path(), id))
            .await?;
        Ok((!snapshot.inactive).then_some(snapshot))
    }

    pub async fn deactivate(&self, parent: SnapshotParent, id: &str) -> Result<Vec<Task>> {
        self.client
            .post_tasks(
                &format!("{}/{}/deactivate", parent.snapshot_path(), id),
                None::<&()>,
            )
            .await
    }

    /// New volume from a block snapshot
    pub async fn full_copy(&self, snapshot_id: &str, param: &FullCopyParam) -> Result<Vec<Task>> {
        self.client
            .post_tasks(
                &format!("/block/snapshots/{}/protection/full-copies", snapshot_id),
                Some(param),
            )
            .await
    }
}
