//! PostgreSQL implementation of [`StageStore`].

use async_trait::async_trait;
use capstan_core::store::{LockChange, LockRelease, OwnerAttach, StageStore};
use capstan_core::{
    ClonePlan, ConfigurationParameter, Deployment, DeploymentId, DeploymentStatus, Host,
    NewDeployment, NewParameter, NewRole, NewStage, ParameterOwner, Project, ProjectId, Recipe,
    RecipeId, Role, Stage, StageId, StageSnapshot, ValidationErrors,
};
use sqlx::PgPool;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tracing::{debug, info};

use crate::error::is_unique_violation;
use crate::repo::{deployment, host, parameter, project, recipe, role, stage};
use crate::{DbError, DbResult};

const NAME_TAKEN: &str = "has already been taken";

pub struct PgStageStore {
    pool: PgPool,
}

impl PgStageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> DbResult<PoolConnection<Postgres>> {
        Ok(self.pool.acquire().await?)
    }

    async fn insert_stage(&self, new_stage: NewStage) -> DbResult<Stage> {
        let mut conn = self.conn().await?;
        project::get(&mut conn, new_stage.project_id).await?;

        let mut errors = new_stage.validate().err().unwrap_or_default();
        if stage::name_taken(&mut conn, new_stage.project_id, &new_stage.name).await? {
            errors.add("name", NAME_TAKEN);
        }
        errors.into_result()?;

        match stage::insert(&mut conn, &new_stage).await {
            Ok(created) => Ok(created),
            // Lost a race with a concurrent insert of the same name.
            Err(DbError::Database(e)) if is_unique_violation(&e) => {
                let mut errors = ValidationErrors::new();
                errors.add("name", NAME_TAKEN);
                Err(errors.into())
            }
            Err(e) => Err(e),
        }
    }

    /// All reads see one database snapshot.
    async fn snapshot(&self, id: StageId) -> DbResult<StageSnapshot> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;
        let loaded = stage::get(&mut tx, id).await?;
        let project_parameters = parameter::list_for_project(&mut tx, loaded.project_id).await?;
        let parameters = parameter::list_for_stage(&mut tx, id).await?;
        let roles = role::list_for_stage(&mut tx, id).await?;
        let recipes = recipe::list_for_stage(&mut tx, id).await?;
        tx.commit().await?;

        Ok(StageSnapshot {
            stage: loaded,
            project_parameters,
            parameters,
            roles,
            recipes,
        })
    }

    async fn upsert_parameter(
        &self,
        owner: ParameterOwner,
        new_parameter: NewParameter,
    ) -> DbResult<ConfigurationParameter> {
        let mut conn = self.conn().await?;
        match owner {
            ParameterOwner::Project(project_id) => {
                project::get(&mut conn, project_id).await?;
                parameter::upsert_project(&mut conn, project_id, &new_parameter).await
            }
            ParameterOwner::Stage(stage_id) => {
                let owner_stage = stage::get(&mut conn, stage_id).await?;
                parameter::upsert_stage(
                    &mut conn,
                    owner_stage.project_id,
                    stage_id,
                    &new_parameter,
                )
                .await
            }
        }
    }

    async fn remove_parameter(&self, owner: ParameterOwner, name: &str) -> DbResult<()> {
        let mut conn = self.conn().await?;
        match owner {
            ParameterOwner::Project(project_id) => {
                parameter::delete_project(&mut conn, project_id, name).await
            }
            ParameterOwner::Stage(stage_id) => {
                parameter::delete_stage(&mut conn, stage_id, name).await
            }
        }
    }

    async fn link_recipe(&self, stage_id: StageId, recipe_id: RecipeId) -> DbResult<()> {
        let mut conn = self.conn().await?;
        stage::get(&mut conn, stage_id).await?;
        if !recipe::exists(&mut conn, recipe_id).await? {
            return Err(DbError::NotFound(format!("recipe {}", recipe_id)));
        }
        recipe::attach(&mut conn, stage_id, recipe_id).await
    }

    async fn clone_into(&self, target: StageId, plan: &ClonePlan) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        stage::find_for_update(&mut tx, target)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("stage {}", target)))?;

        parameter::delete_all_for_stage(&mut tx, target).await?;
        recipe::detach_all(&mut tx, target).await?;
        role::delete_all_for_stage(&mut tx, target).await?;

        for cloned in &plan.parameters {
            parameter::upsert_stage(&mut tx, cloned.project_id, target, &cloned.parameter).await?;
        }
        for recipe_id in &plan.recipes {
            recipe::attach(&mut tx, target, *recipe_id).await?;
        }
        for new_role in &plan.roles {
            role::insert(&mut tx, target, new_role).await?;
        }

        tx.commit().await?;
        debug!(
            stage_id = %target,
            parameters = plan.parameters.len(),
            recipes = plan.recipes.len(),
            roles = plan.roles.len(),
            "Applied clone plan"
        );
        Ok(())
    }

    async fn write_locked(&self, id: StageId, locked: bool) -> DbResult<Option<LockChange>> {
        let mut tx = self.pool.begin().await?;

        let Some(current) = stage::find_for_update(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        let updated = stage::update_locked(&mut tx, id, locked).await?;
        tx.commit().await?;

        Ok(Some(LockChange {
            was_locked: current.locked,
            stage: updated,
        }))
    }

    async fn write_lock_owner(
        &self,
        id: StageId,
        deployment_id: DeploymentId,
    ) -> DbResult<Option<OwnerAttach>> {
        let mut tx = self.pool.begin().await?;

        let Some(current) = stage::find_for_update(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        if !current.locked {
            tx.rollback().await?;
            return Ok(Some(OwnerAttach::NotLocked(current)));
        }

        let updated = stage::update_lock_owner(&mut tx, id, deployment_id).await?;
        tx.commit().await?;
        Ok(Some(OwnerAttach::Attached(updated)))
    }

    async fn write_release(
        &self,
        id: StageId,
        deployment_id: DeploymentId,
    ) -> DbResult<Option<LockRelease>> {
        let mut tx = self.pool.begin().await?;

        let Some(current) = stage::find_for_update(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        if !current.locked || current.locked_by_deployment_id != Some(deployment_id) {
            tx.rollback().await?;
            return Ok(Some(LockRelease::NotHeld(current)));
        }

        let updated = stage::update_locked(&mut tx, id, false).await?;
        tx.commit().await?;
        Ok(Some(LockRelease::Released(updated)))
    }
}

#[async_trait]
impl StageStore for PgStageStore {
    async fn create_project(&self, name: &str) -> capstan_core::Result<Project> {
        let mut conn = self.conn().await?;
        let created = project::insert(&mut conn, name).await?;
        info!(project_id = %created.id, name = %created.name, "Created project");
        Ok(created)
    }

    async fn get_project(&self, id: ProjectId) -> capstan_core::Result<Project> {
        let mut conn = self.conn().await?;
        Ok(project::get(&mut conn, id).await?)
    }

    async fn list_projects(&self) -> capstan_core::Result<Vec<Project>> {
        let mut conn = self.conn().await?;
        Ok(project::list(&mut conn).await?)
    }

    async fn create_stage(&self, new_stage: NewStage) -> capstan_core::Result<Stage> {
        let created = self.insert_stage(new_stage).await?;
        info!(stage_id = %created.id, project_id = %created.project_id, name = %created.name, "Created stage");
        Ok(created)
    }

    async fn get_stage(&self, id: StageId) -> capstan_core::Result<Stage> {
        let mut conn = self.conn().await?;
        Ok(stage::get(&mut conn, id).await?)
    }

    async fn list_stages(&self, project_id: ProjectId) -> capstan_core::Result<Vec<Stage>> {
        let mut conn = self.conn().await?;
        Ok(stage::list(&mut conn, project_id).await?)
    }

    async fn delete_stage(&self, id: StageId) -> capstan_core::Result<()> {
        let mut conn = self.conn().await?;
        if !stage::delete(&mut conn, id).await? {
            return Err(DbError::NotFound(format!("stage {}", id)).into());
        }
        info!(stage_id = %id, "Deleted stage");
        Ok(())
    }

    async fn load_snapshot(&self, id: StageId) -> capstan_core::Result<StageSnapshot> {
        Ok(self.snapshot(id).await?)
    }

    async fn set_parameter(
        &self,
        owner: ParameterOwner,
        parameter: NewParameter,
    ) -> capstan_core::Result<ConfigurationParameter> {
        Ok(self.upsert_parameter(owner, parameter).await?)
    }

    async fn delete_parameter(&self, owner: ParameterOwner, name: &str) -> capstan_core::Result<()> {
        Ok(self.remove_parameter(owner, name).await?)
    }

    async fn create_host(&self, name: &str) -> capstan_core::Result<Host> {
        let mut conn = self.conn().await?;
        Ok(host::insert(&mut conn, name).await?)
    }

    async fn add_role(&self, stage_id: StageId, new_role: NewRole) -> capstan_core::Result<Role> {
        let mut conn = self.conn().await?;
        stage::get(&mut conn, stage_id).await?;
        Ok(role::insert(&mut conn, stage_id, &new_role).await?)
    }

    async fn create_recipe(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> capstan_core::Result<Recipe> {
        let mut conn = self.conn().await?;
        Ok(recipe::insert(&mut conn, name, description).await?)
    }

    async fn attach_recipe(&self, stage_id: StageId, recipe_id: RecipeId) -> capstan_core::Result<()> {
        Ok(self.link_recipe(stage_id, recipe_id).await?)
    }

    async fn apply_clone(&self, target: StageId, plan: &ClonePlan) -> capstan_core::Result<()> {
        Ok(self.clone_into(target, plan).await?)
    }

    async fn create_deployment(
        &self,
        new_deployment: NewDeployment,
    ) -> capstan_core::Result<Deployment> {
        let mut conn = self.conn().await?;
        stage::get(&mut conn, new_deployment.stage_id).await?;
        Ok(deployment::insert(&mut conn, &new_deployment).await?)
    }

    async fn get_deployment(&self, id: DeploymentId) -> capstan_core::Result<Deployment> {
        let mut conn = self.conn().await?;
        Ok(deployment::get(&mut conn, id).await?)
    }

    async fn finish_deployment(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
    ) -> capstan_core::Result<Deployment> {
        let mut conn = self.conn().await?;
        Ok(deployment::finish(&mut conn, id, status).await?)
    }

    async fn recent_deployments(
        &self,
        stage_id: StageId,
        limit: i64,
    ) -> capstan_core::Result<Vec<Deployment>> {
        let mut conn = self.conn().await?;
        Ok(deployment::recent(&mut conn, stage_id, limit).await?)
    }

    async fn set_locked(&self, id: StageId, locked: bool) -> capstan_core::Result<Option<LockChange>> {
        Ok(self.write_locked(id, locked).await?)
    }

    async fn set_lock_owner(
        &self,
        id: StageId,
        deployment: DeploymentId,
    ) -> capstan_core::Result<Option<OwnerAttach>> {
        Ok(self.write_lock_owner(id, deployment).await?)
    }

    async fn release_lock(
        &self,
        id: StageId,
        deployment: DeploymentId,
    ) -> capstan_core::Result<Option<LockRelease>> {
        Ok(self.write_release(id, deployment).await?)
    }
}
