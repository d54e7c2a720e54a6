//! Stage deployment-state model for Capstan.
//!
//! This crate contains:
//! - Typed resource identifiers
//! - Projects, stages, roles and configuration parameters
//! - Project/stage configuration resolution
//! - Deployment readiness checks
//! - Stage locking and the deployment gate built on it
//! - Stage cloning
//! - Persistence and task-runner collaborator traits

pub mod cloner;
pub mod configuration;
pub mod deployment;
pub mod error;
pub mod gate;
pub mod id;
pub mod lock;
pub mod readiness;
pub mod stage;
pub mod store;
pub mod tasks;
pub mod validation;

#[cfg(test)]
mod memory;

pub use cloner::{ClonePlan, StageCloner};
pub use configuration::{
    ConfigurationParameter, ConfigurationResolver, NewParameter, ParameterOwner, ParameterScope,
};
pub use deployment::{Deployment, DeploymentStatus, NewDeployment};
pub use error::{Error, Result};
pub use gate::DeploymentGate;
pub use id::{DeploymentId, HostId, ParameterId, ProjectId, RecipeId, RoleId, StageId};
pub use lock::{LockTransition, StageLock};
pub use readiness::{DeploymentProblems, ReadinessChecker, RequiredVariable};
pub use stage::{
    Host, LockState, NewRole, NewStage, Project, Recipe, Role, Stage, StageSnapshot,
};
pub use store::{LockChange, LockRelease, OwnerAttach, StageStore};
pub use tasks::{TaskDescriptor, TaskRunner, TaskRunnerError};
pub use validation::{FieldError, ValidationErrors};
