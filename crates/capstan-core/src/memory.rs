//! In-memory `StageStore` for unit tests.
//!
//! The single mutex stands in for the database row lock; it is only correct
//! within one process.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use crate::cloner::ClonePlan;
use crate::configuration::{ConfigurationParameter, NewParameter, ParameterOwner};
use crate::deployment::{Deployment, DeploymentStatus, NewDeployment};
use crate::id::{DeploymentId, HostId, ParameterId, ProjectId, RecipeId, RoleId, StageId};
use crate::stage::{Host, NewRole, NewStage, Project, Recipe, Role, Stage, StageSnapshot};
use crate::store::{LockChange, LockRelease, OwnerAttach, StageStore};
use crate::{Error, Result, ValidationErrors};

#[derive(Default)]
struct State {
    projects: HashMap<ProjectId, Project>,
    stages: HashMap<StageId, Stage>,
    parameters: Vec<ConfigurationParameter>,
    hosts: HashMap<HostId, Host>,
    roles: Vec<Role>,
    recipes: HashMap<RecipeId, Recipe>,
    recipe_links: BTreeSet<(StageId, RecipeId)>,
    deployments: Vec<Deployment>,
    failing: BTreeSet<&'static str>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Storage("state poisoned".to_string()))?;
        f(&mut state)
    }

    /// Make every later call of the named store operation fail with `Error::Storage`.
    pub fn fail(&self, operation: &'static str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.insert(operation);
        }
    }
}

impl State {
    fn check(&self, operation: &'static str) -> Result<()> {
        if self.failing.contains(operation) {
            return Err(Error::Storage(format!("{} failed", operation)));
        }
        Ok(())
    }

    fn stage(&self, id: StageId) -> Result<&Stage> {
        self.stages
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("stage {}", id)))
    }

    fn insert_parameter(
        &mut self,
        project_id: ProjectId,
        stage_id: Option<StageId>,
        parameter: NewParameter,
    ) -> ConfigurationParameter {
        let now = Utc::now();
        let created = ConfigurationParameter {
            id: ParameterId::new(),
            name: parameter.name,
            value: parameter.value,
            project_id,
            stage_id,
            prompt_on_deploy: parameter.prompt_on_deploy,
            created_at: now,
            updated_at: now,
        };
        self.parameters.push(created.clone());
        created
    }

    fn insert_role(&mut self, stage_id: StageId, role: NewRole) -> Role {
        let created = Role {
            id: RoleId::new(),
            stage_id,
            host_id: role.host_id,
            name: role.name,
            primary: role.primary,
            no_release: role.no_release,
            no_symlink: role.no_symlink,
            ssh_port: role.ssh_port,
            created_at: Utc::now(),
        };
        self.roles.push(created.clone());
        created
    }
}

fn owner_matches(parameter: &ConfigurationParameter, owner: ParameterOwner) -> bool {
    match owner {
        ParameterOwner::Project(id) => parameter.project_id == id && parameter.stage_id.is_none(),
        ParameterOwner::Stage(id) => parameter.stage_id == Some(id),
    }
}

#[async_trait]
impl StageStore for MemoryStore {
    async fn create_project(&self, name: &str) -> Result<Project> {
        self.with(|state| {
            let now = Utc::now();
            let project = Project {
                id: ProjectId::new(),
                name: name.to_string(),
                created_at: now,
                updated_at: now,
            };
            state.projects.insert(project.id, project.clone());
            Ok(project)
        })
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project> {
        self.with(|state| {
            state
                .projects
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("project {}", id)))
        })
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        self.with(|state| {
            let mut projects: Vec<_> = state.projects.values().cloned().collect();
            projects.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(projects)
        })
    }

    async fn create_stage(&self, stage: NewStage) -> Result<Stage> {
        let mut errors = match stage.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };
        self.with(|state| {
            if !state.projects.contains_key(&stage.project_id) {
                return Err(Error::NotFound(format!("project {}", stage.project_id)));
            }
            let taken = state
                .stages
                .values()
                .any(|s| s.project_id == stage.project_id && s.name == stage.name);
            if taken {
                errors.add("name", "has already been taken");
            }
            errors.into_result()?;

            let now = Utc::now();
            let created = Stage {
                id: StageId::new(),
                project_id: stage.project_id,
                name: stage.name,
                alert_emails: stage.alert_emails,
                locked: false,
                locked_by_deployment_id: None,
                created_at: now,
                updated_at: now,
            };
            state.stages.insert(created.id, created.clone());
            Ok(created)
        })
    }

    async fn get_stage(&self, id: StageId) -> Result<Stage> {
        self.with(|state| state.stage(id).cloned())
    }

    async fn list_stages(&self, project_id: ProjectId) -> Result<Vec<Stage>> {
        self.with(|state| {
            let mut stages: Vec<_> = state
                .stages
                .values()
                .filter(|s| s.project_id == project_id)
                .cloned()
                .collect();
            stages.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(stages)
        })
    }

    async fn delete_stage(&self, id: StageId) -> Result<()> {
        self.with(|state| {
            if state.stages.remove(&id).is_none() {
                return Err(Error::NotFound(format!("stage {}", id)));
            }
            state.parameters.retain(|p| p.stage_id != Some(id));
            state.roles.retain(|r| r.stage_id != id);
            state.recipe_links.retain(|(stage_id, _)| *stage_id != id);
            state.deployments.retain(|d| d.stage_id != id);
            Ok(())
        })
    }

    async fn load_snapshot(&self, id: StageId) -> Result<StageSnapshot> {
        self.with(|state| {
            let stage = state.stage(id)?.clone();

            let mut project_parameters: Vec<_> = state
                .parameters
                .iter()
                .filter(|p| owner_matches(p, ParameterOwner::Project(stage.project_id)))
                .cloned()
                .collect();
            project_parameters.sort_by(|a, b| a.name.cmp(&b.name));

            let mut parameters: Vec<_> = state
                .parameters
                .iter()
                .filter(|p| owner_matches(p, ParameterOwner::Stage(id)))
                .cloned()
                .collect();
            parameters.sort_by(|a, b| a.name.cmp(&b.name));

            let mut roles: Vec<_> = state
                .roles
                .iter()
                .filter(|r| r.stage_id == id)
                .cloned()
                .collect();
            roles.sort_by(|a, b| a.name.cmp(&b.name));

            let mut recipes: Vec<Recipe> = state
                .recipe_links
                .iter()
                .filter(|(stage_id, _)| *stage_id == id)
                .filter_map(|(_, recipe_id)| state.recipes.get(recipe_id).cloned())
                .collect();
            recipes.sort_by(|a, b| a.name.cmp(&b.name));

            Ok(StageSnapshot {
                stage,
                project_parameters,
                parameters,
                roles,
                recipes,
            })
        })
    }

    async fn set_parameter(
        &self,
        owner: ParameterOwner,
        parameter: NewParameter,
    ) -> Result<ConfigurationParameter> {
        self.with(|state| {
            let (project_id, stage_id) = match owner {
                ParameterOwner::Project(id) => (id, None),
                ParameterOwner::Stage(id) => (state.stage(id)?.project_id, Some(id)),
            };
            state
                .parameters
                .retain(|p| !(owner_matches(p, owner) && p.name == parameter.name));
            Ok(state.insert_parameter(project_id, stage_id, parameter))
        })
    }

    async fn delete_parameter(&self, owner: ParameterOwner, name: &str) -> Result<()> {
        self.with(|state| {
            state
                .parameters
                .retain(|p| !(owner_matches(p, owner) && p.name == name));
            Ok(())
        })
    }

    async fn create_host(&self, name: &str) -> Result<Host> {
        self.with(|state| {
            let host = Host {
                id: HostId::new(),
                name: name.to_string(),
                created_at: Utc::now(),
            };
            state.hosts.insert(host.id, host.clone());
            Ok(host)
        })
    }

    async fn add_role(&self, stage_id: StageId, role: NewRole) -> Result<Role> {
        self.with(|state| {
            state.stage(stage_id)?;
            Ok(state.insert_role(stage_id, role))
        })
    }

    async fn create_recipe(&self, name: &str, description: Option<&str>) -> Result<Recipe> {
        self.with(|state| {
            let recipe = Recipe {
                id: RecipeId::new(),
                name: name.to_string(),
                description: description.map(String::from),
                created_at: Utc::now(),
            };
            state.recipes.insert(recipe.id, recipe.clone());
            Ok(recipe)
        })
    }

    async fn attach_recipe(&self, stage_id: StageId, recipe_id: RecipeId) -> Result<()> {
        self.with(|state| {
            state.stage(stage_id)?;
            state.recipe_links.insert((stage_id, recipe_id));
            Ok(())
        })
    }

    async fn apply_clone(&self, target: StageId, plan: &ClonePlan) -> Result<()> {
        self.with(|state| {
            state.check("apply_clone")?;
            state.stage(target)?;

            state.parameters.retain(|p| p.stage_id != Some(target));
            state.recipe_links.retain(|(stage_id, _)| *stage_id != target);
            state.roles.retain(|r| r.stage_id != target);

            for parameter in &plan.parameters {
                state.insert_parameter(
                    parameter.project_id,
                    Some(target),
                    parameter.parameter.clone(),
                );
            }
            for recipe_id in &plan.recipes {
                state.recipe_links.insert((target, *recipe_id));
            }
            for role in &plan.roles {
                state.insert_role(target, role.clone());
            }
            Ok(())
        })
    }

    async fn create_deployment(&self, deployment: NewDeployment) -> Result<Deployment> {
        self.with(|state| {
            state.check("create_deployment")?;
            state.stage(deployment.stage_id)?;
            let created = Deployment {
                id: DeploymentId::new(),
                stage_id: deployment.stage_id,
                task: deployment.task,
                description: deployment.description,
                status: DeploymentStatus::Running,
                created_at: Utc::now(),
                completed_at: None,
            };
            state.deployments.push(created.clone());
            Ok(created)
        })
    }

    async fn get_deployment(&self, id: DeploymentId) -> Result<Deployment> {
        self.with(|state| {
            state
                .deployments
                .iter()
                .find(|d| d.id == id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("deployment {}", id)))
        })
    }

    async fn finish_deployment(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
    ) -> Result<Deployment> {
        self.with(|state| {
            let deployment = state
                .deployments
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| Error::NotFound(format!("deployment {}", id)))?;
            deployment.status = status;
            deployment.completed_at = Some(Utc::now());
            Ok(deployment.clone())
        })
    }

    async fn recent_deployments(&self, stage_id: StageId, limit: i64) -> Result<Vec<Deployment>> {
        self.with(|state| {
            let mut deployments: Vec<_> = state
                .deployments
                .iter()
                .filter(|d| d.stage_id == stage_id)
                .cloned()
                .collect();
            deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            deployments.truncate(usize::try_from(limit).unwrap_or(0));
            Ok(deployments)
        })
    }

    async fn set_locked(&self, id: StageId, locked: bool) -> Result<Option<LockChange>> {
        self.with(|state| {
            let Some(stage) = state.stages.get_mut(&id) else {
                return Ok(None);
            };
            let was_locked = stage.locked;
            stage.locked = locked;
            if !locked {
                stage.locked_by_deployment_id = None;
            }
            stage.updated_at = Utc::now();
            Ok(Some(LockChange {
                was_locked,
                stage: stage.clone(),
            }))
        })
    }

    async fn set_lock_owner(
        &self,
        id: StageId,
        deployment: DeploymentId,
    ) -> Result<Option<OwnerAttach>> {
        self.with(|state| {
            let Some(stage) = state.stages.get_mut(&id) else {
                return Ok(None);
            };
            if !stage.locked {
                return Ok(Some(OwnerAttach::NotLocked(stage.clone())));
            }
            stage.locked_by_deployment_id = Some(deployment);
            stage.updated_at = Utc::now();
            Ok(Some(OwnerAttach::Attached(stage.clone())))
        })
    }

    async fn release_lock(
        &self,
        id: StageId,
        deployment: DeploymentId,
    ) -> Result<Option<LockRelease>> {
        self.with(|state| {
            let Some(stage) = state.stages.get_mut(&id) else {
                return Ok(None);
            };
            if !stage.locked || stage.locked_by_deployment_id != Some(deployment) {
                return Ok(Some(LockRelease::NotHeld(stage.clone())));
            }
            stage.locked = false;
            stage.locked_by_deployment_id = None;
            stage.updated_at = Utc::now();
            Ok(Some(LockRelease::Released(stage.clone())))
        })
    }
}
