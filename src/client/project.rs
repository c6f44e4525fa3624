//! Project API

use crate::client::ControllerClient;
use crate::domain::model::{Project, ProjectResource, ProjectResourceList};
use crate::error::Result;

/// Project operations
pub struct ProjectApi<'a> {
    client: &'a ControllerClient,
}

impl<'a> ProjectApi<'a> {
    pub(crate) fn new(client: &'a ControllerClient) -> Self {
        Self { client }
    }

    pub async fn show(&self, id: &str) -> Result<Option<Project>> {
        let project: Project = self.client.get(&format!("/projects/{}", id)).await?;
        Ok((!project.inactive).then_some(project))
    }

    /// Every resource owned by the project, tagged with its resource type
    pub async fn resources(&self, id: &str) -> Result<Vec<ProjectResource>> {
        let list: ProjectResourceList = self.client.get(&format!("/projects/{}/resources", id)).await?;
        Ok(list.project_resource)
    }
}
