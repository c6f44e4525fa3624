//! Task Waiter
//!
//! Polls the task endpoint of a resource until the operation is `ready`,
//! `error`, or the deadline passes. The deadline is a single timer around
//! the whole loop; a timeout leaves the server-side task running.

use crate::client::ControllerClient;
use crate::config::DriverConfig;
use crate::domain::model::{Task, TaskState};
use crate::error::{Error, Result};
use crate::resolver::URN_PREFIX;
use std::time::Duration;
use tracing::{debug, warn};

/// Resource families with a task sub-resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResourceKind {
    Volume,
    Snapshot,
    FileSnapshot,
    ExportGroup,
    ConsistencyGroup,
    Host,
    Initiator,
}

impl TaskResourceKind {
    pub fn path(&self) -> &'static str {
        match self {
            TaskResourceKind::Volume => "/block/volumes",
            TaskResourceKind::Snapshot => "/block/snapshots",
            TaskResourceKind::FileSnapshot => "/file/snapshots",
            TaskResourceKind::ExportGroup => "/block/exports",
            TaskResourceKind::ConsistencyGroup => "/block/consistency-groups",
            TaskResourceKind::Host => "/compute/hosts",
            TaskResourceKind::Initiator => "/compute/initiators",
        }
    }

    /// Kind encoded in a controller URN, e.g. `urn:storageos:Volume:...`
    pub fn from_resource_id(id: &str) -> Option<Self> {
        let type_name = id.strip_prefix(URN_PREFIX)?.split(':').next()?;
        match type_name {
            "Volume" => Some(TaskResourceKind::Volume),
            "BlockSnapshot" => Some(TaskResourceKind::Snapshot),
            "Snapshot" => Some(TaskResourceKind::FileSnapshot),
            "ExportGroup" => Some(TaskResourceKind::ExportGroup),
            "BlockConsistencyGroup" => Some(TaskResourceKind::ConsistencyGroup),
            "Host" => Some(TaskResourceKind::Host),
            "Initiator" => Some(TaskResourceKind::Initiator),
            _ => None,
        }
    }
}

/// Terminal result of waiting on a task
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Ready(Task),
    /// Deadline passed; the task may still complete on the controller
    TimedOut { resource: String, op_id: String },
}

impl TaskOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, TaskOutcome::Ready(_))
    }
}

/// Waits for controller tasks. Each `wait` owns its own timer.
#[derive(Clone)]
pub struct TaskWaiter {
    client: ControllerClient,
    timeout: Duration,
    interval: Duration,
}

impl TaskWaiter {
    pub fn new(client: ControllerClient, timeout: Duration, interval: Duration) -> Self {
        Self {
            client,
            timeout,
            interval,
        }
    }

    pub fn from_config(client: ControllerClient, config: &DriverConfig) -> Self {
        Self::new(client, config.task_timeout(), config.task_poll_interval())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for a task whose resource kind is known
    pub async fn wait(&self, kind: TaskResourceKind, task: &Task) -> Result<TaskOutcome> {
        let metrics = self.client.metrics();
        match task.state {
            TaskState::Ready => {
                metrics.task_outcomes.with_label_values(&["ready"]).inc();
                return Ok(TaskOutcome::Ready(task.clone()));
            }
            TaskState::Error => {
                metrics.task_outcomes.with_label_values(&["error"]).inc();
                return Err(task_failed(task));
            }
            _ => {}
        }

        let path = format!("{}/{}/tasks/{}", kind.path(), task.resource.id, task.op_id);
        let poll = async {
            loop {
                metrics.task_polls.inc();
                let current: Task = self.client.get(&path).await?;
                match current.state {
                    TaskState::Ready => return Ok(current),
                    TaskState::Error => return Err(task_failed(&current)),
                    state => debug!("Task {} on {} is {:?}", current.op_id, current.resource.id, state),
                }
                tokio::time::sleep(self.interval).await;
            }
        };

        match tokio::time::timeout(self.timeout, poll).await {
            Ok(Ok(done)) => {
                metrics.task_outcomes.with_label_values(&["ready"]).inc();
                Ok(TaskOutcome::Ready(done))
            }
            Ok(Err(e)) => {
                if matches!(e, Error::TaskFailed { .. }) {
                    metrics.task_outcomes.with_label_values(&["error"]).inc();
                }
                Err(e)
            }
            Err(_) => {
                metrics.task_outcomes.with_label_values(&["timed_out"]).inc();
                warn!(
                    "Task {} on {} still running after {:?}",
                    task.op_id, task.resource.id, self.timeout
                );
                Ok(TaskOutcome::TimedOut {
                    resource: task.resource.id.clone(),
                    op_id: task.op_id.clone(),
                })
            }
        }
    }

    /// Wait for a task, inferring the resource kind from its URN
    pub async fn wait_for(&self, task: &Task) -> Result<TaskOutcome> {
        let kind = TaskResourceKind::from_resource_id(&task.resource.id).ok_or_else(|| {
            Error::InvalidInput(format!(
                "cannot infer task endpoint for resource {}",
                task.resource.id
            ))
        })?;
        self.wait(kind, task).await
    }

    /// Wait for each task in order
    pub async fn wait_all(&self, tasks: &[Task]) -> Result<Vec<TaskOutcome>> {
        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            outcomes.push(self.wait_for(task).await?);
        }
        Ok(outcomes)
    }

    /// Wait for a task, surfacing a timeout as `TaskTimedOut`
    pub async fn wait_ready(&self, task: &Task) -> Result<Task> {
        match self.wait_for(task).await? {
            TaskOutcome::Ready(done) => Ok(done),
            TaskOutcome::TimedOut { resource, op_id } => Err(Error::TaskTimedOut {
                resource,
                operation: op_id,
                duration: format!("{:?}", self.timeout),
            }),
        }
    }

    /// Wait for every task, surfacing a timeout as `TaskTimedOut`
    pub async fn wait_all_ready(&self, tasks: &[Task]) -> Result<Vec<Task>> {
        let mut done = Vec::with_capacity(tasks.len());
        for task in tasks {
            done.push(self.wait_ready(task).await?);
        }
        Ok(done)
    }
}

fn task_failed(task: &Task) -> Error {
    Error::TaskFailed {
        resource: task
            .resource
            .name
            .clone()
            .unwrap_or_else(|| task.resource.id.clone()),
        operation: task
            .description
            .clone()
            .unwrap_or_else(|| task.op_id.clone()),
        message: task
            .message
            .clone()
            .unwrap_or_else(|| "no message from controller".to_string()),
    }
}
