//! Deployment records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{DeploymentId, StageId};

/// Status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failed | DeploymentStatus::Canceled
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentStatus::Pending => write!(f, "pending"),
            DeploymentStatus::Running => write!(f, "running"),
            DeploymentStatus::Success => write!(f, "success"),
            DeploymentStatus::Failed => write!(f, "failed"),
            DeploymentStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "running" => Ok(DeploymentStatus::Running),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            "canceled" => Ok(DeploymentStatus::Canceled),
            other => Err(format!("unknown deployment status: {}", other)),
        }
    }
}

/// One execution attempt against a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub stage_id: StageId,
    /// Fully qualified task name, e.g. `deploy:migrations`.
    pub task: String,
    pub description: Option<String>,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// An unsaved deployment bound to `stage_id`, used to ask the task runner
    /// what a stage offers without recording anything.
    pub fn transient(stage_id: StageId) -> Self {
        Self {
            id: DeploymentId::new(),
            stage_id,
            task: String::new(),
            description: None,
            status: DeploymentStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Input for recording a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeployment {
    pub stage_id: StageId,
    pub task: String,
    pub description: Option<String>,
}

impl NewDeployment {
    pub fn new(stage_id: StageId, task: impl Into<String>) -> Self {
        Self {
            stage_id,
            task: task.into(),
            description: None,
        }
    }
}
