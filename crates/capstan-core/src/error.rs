//! Error types for Capstan.

use thiserror::Error;

use crate::id::{DeploymentId, StageId};
use crate::readiness::DeploymentProblems;
use crate::validation::ValidationErrors;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("deployment {deployment} does not belong to stage {stage}")]
    DeploymentMismatch {
        deployment: DeploymentId,
        stage: StageId,
    },

    #[error("deployment not possible: {0}")]
    NotDeployable(DeploymentProblems),

    #[error("stage {0} is locked by another deployment")]
    StageLocked(StageId),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Error::Validation(errors)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
