//! Task-runner collaborator and the task listing offered for a stage.
//!
//! Listing tasks loads the stage's recipes in an external runner, which can
//! fail for reasons outside our control (syntax errors in a recipe, a missing
//! binary, a hung process). Those failures never reach the caller: they are
//! turned into a single placeholder entry.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

use crate::deployment::Deployment;
use crate::stage::StageSnapshot;

/// Runner-internal tasks that are never offered to operators.
pub const HIDDEN_TASKS: [&str; 2] = ["shell", "invoke"];

/// A task the runner can execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Fully qualified name, e.g. `deploy:rollback`.
    pub name: String,
    pub description: String,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Entry shown in place of the listing when the runner fails.
    pub fn load_error() -> Self {
        Self::new(
            "Error",
            "Could not load tasks - syntax error in recipe definition?",
        )
    }
}

#[derive(Debug, Error)]
pub enum TaskRunnerError {
    #[error("failed to start task runner: {0}")]
    Spawn(String),

    #[error("task runner exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("task runner timed out after {0:?}")]
    Timeout(Duration),

    #[error("task runner panicked: {0}")]
    Panicked(String),
}

/// Something that knows which tasks a deployment of a stage could run.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Name of this runner.
    fn name(&self) -> &'static str;

    /// List the tasks available to `deployment`, which is bound to `stage`.
    async fn list_tasks(
        &self,
        deployment: &Deployment,
        stage: &StageSnapshot,
    ) -> Result<Vec<TaskDescriptor>, TaskRunnerError>;
}

/// Turn a runner result into what operators see: hidden tasks removed on
/// success, the placeholder on failure.
pub fn task_listing(result: Result<Vec<TaskDescriptor>, TaskRunnerError>) -> Vec<TaskDescriptor> {
    match result {
        Ok(tasks) => tasks
            .into_iter()
            .filter(|t| !HIDDEN_TASKS.contains(&t.name.as_str()))
            .collect(),
        Err(_) => vec![TaskDescriptor::load_error()],
    }
}

/// Ask `runner` for the tasks of `stage` using a transient deployment.
pub async fn list_tasks(runner: &dyn TaskRunner, stage: &StageSnapshot) -> Vec<TaskDescriptor> {
    let deployment = Deployment::transient(stage.stage.id);

    let result = AssertUnwindSafe(runner.list_tasks(&deployment, stage))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(TaskRunnerError::Panicked(panic_message(panic.as_ref()))));

    if let Err(e) = &result {
        error!(
            stage_id = %stage.stage.id,
            runner = runner.name(),
            error = %e,
            "Problem listing tasks of stage"
        );
    }

    task_listing(result)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
