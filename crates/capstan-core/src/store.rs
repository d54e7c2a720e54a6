//! Persistence collaborator.
//!
//! The lock operations are the only ones that must be atomic across callers:
//! implementations re-read the stage row under an exclusive row lock, write,
//! and release the lock before returning. Everything else works on whatever
//! the caller last loaded.

use async_trait::async_trait;

use crate::Result;
use crate::cloner::ClonePlan;
use crate::configuration::{ConfigurationParameter, NewParameter, ParameterOwner};
use crate::deployment::{Deployment, DeploymentStatus, NewDeployment};
use crate::id::{DeploymentId, ProjectId, RecipeId, StageId};
use crate::stage::{Host, NewRole, NewStage, Project, Recipe, Role, Stage, StageSnapshot};

/// Result of flipping a stage's lock flag under an exclusive row lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockChange {
    /// The flag as it was when the row lock was taken.
    pub was_locked: bool,
    /// The row after the write.
    pub stage: Stage,
}

/// Result of attaching a deployment to a stage's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerAttach {
    /// The stored row was locked and now names the deployment.
    Attached(Stage),
    /// The stored row was unlocked; nothing was written.
    NotLocked(Stage),
}

/// Result of a deployment releasing its stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockRelease {
    /// The deployment held the lock and it is now clear.
    Released(Stage),
    /// The stage is unlocked, unowned, or owned by another deployment; nothing was written.
    NotHeld(Stage),
}

#[async_trait]
pub trait StageStore: Send + Sync {
    // Projects
    async fn create_project(&self, name: &str) -> Result<Project>;
    async fn get_project(&self, id: ProjectId) -> Result<Project>;
    async fn list_projects(&self) -> Result<Vec<Project>>;

    // Stages
    /// Validates `stage`, including name uniqueness within its project.
    async fn create_stage(&self, stage: NewStage) -> Result<Stage>;
    async fn get_stage(&self, id: StageId) -> Result<Stage>;
    async fn list_stages(&self, project_id: ProjectId) -> Result<Vec<Stage>>;
    /// Removes the stage with its roles, parameters, deployments and recipe links.
    /// `NotFound` when it does not exist.
    async fn delete_stage(&self, id: StageId) -> Result<()>;
    async fn load_snapshot(&self, id: StageId) -> Result<StageSnapshot>;

    // Configuration
    /// Create or replace the parameter named `parameter.name` on `owner`.
    async fn set_parameter(
        &self,
        owner: ParameterOwner,
        parameter: NewParameter,
    ) -> Result<ConfigurationParameter>;
    async fn delete_parameter(&self, owner: ParameterOwner, name: &str) -> Result<()>;

    // Hosts, roles, recipes
    async fn create_host(&self, name: &str) -> Result<Host>;
    async fn add_role(&self, stage_id: StageId, role: NewRole) -> Result<Role>;
    async fn create_recipe(&self, name: &str, description: Option<&str>) -> Result<Recipe>;
    async fn attach_recipe(&self, stage_id: StageId, recipe_id: RecipeId) -> Result<()>;

    // Cloning
    /// Replace the target's parameters, recipe links and roles with `plan` in one unit.
    async fn apply_clone(&self, target: StageId, plan: &ClonePlan) -> Result<()>;

    // Deployments
    async fn create_deployment(&self, deployment: NewDeployment) -> Result<Deployment>;
    async fn get_deployment(&self, id: DeploymentId) -> Result<Deployment>;
    async fn finish_deployment(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
    ) -> Result<Deployment>;
    /// Newest first.
    async fn recent_deployments(&self, stage_id: StageId, limit: i64) -> Result<Vec<Deployment>>;

    // Locking
    /// Set the lock flag. Unlocking also clears the owning deployment.
    /// `None` when the stage no longer exists.
    async fn set_locked(&self, id: StageId, locked: bool) -> Result<Option<LockChange>>;
    /// Record the deployment holding the lock, only if the stored row is locked.
    /// `None` when the stage no longer exists.
    async fn set_lock_owner(
        &self,
        id: StageId,
        deployment: DeploymentId,
    ) -> Result<Option<OwnerAttach>>;
    /// Unlock only when the stored row is locked by `deployment`.
    /// `None` when the stage no longer exists.
    async fn release_lock(
        &self,
        id: StageId,
        deployment: DeploymentId,
    ) -> Result<Option<LockRelease>>;
}

