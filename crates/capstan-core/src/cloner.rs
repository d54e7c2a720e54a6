//! Seeding a stage from an existing one.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::Result;
use crate::configuration::NewParameter;
use crate::id::{ProjectId, RecipeId, StageId};
use crate::stage::{NewRole, NewStage, StageSnapshot};
use crate::store::StageStore;

/// A stage parameter to recreate on the clone target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClonedParameter {
    /// Owning project, copied from the source parameter.
    pub project_id: ProjectId,
    pub parameter: NewParameter,
}

/// Everything a clone writes to its target. Built from the source alone, so
/// applying it never shares rows with the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClonePlan {
    pub parameters: Vec<ClonedParameter>,
    /// Recipes are shared, only the association is copied.
    pub recipes: Vec<RecipeId>,
    pub roles: Vec<NewRole>,
}

impl ClonePlan {
    pub fn from_snapshot(source: &StageSnapshot) -> Self {
        let parameters = source
            .parameters
            .iter()
            .map(|p| ClonedParameter {
                project_id: p.project_id,
                parameter: NewParameter {
                    name: p.name.clone(),
                    value: p.value.clone(),
                    prompt_on_deploy: p.prompt_on_deploy,
                },
            })
            .collect();

        Self {
            parameters,
            recipes: source.recipes.iter().map(|r| r.id).collect(),
            roles: source.roles.iter().map(NewRole::from).collect(),
        }
    }
}

/// Deep-copies configuration, recipe associations and roles between stages.
pub struct StageCloner {
    store: Arc<dyn StageStore>,
}

impl StageCloner {
    pub fn new(store: Arc<dyn StageStore>) -> Self {
        Self { store }
    }

    /// Replace everything `target` owns with copies of `source`'s.
    ///
    /// Destructive: the target's existing parameters, recipe links and roles
    /// are removed. Returns the target as persisted afterwards.
    pub async fn clone_into(
        &self,
        target: StageId,
        source: &StageSnapshot,
    ) -> Result<StageSnapshot> {
        let plan = ClonePlan::from_snapshot(source);

        self.store.apply_clone(target, &plan).await?;

        info!(
            source = %source.stage.id,
            target = %target,
            parameters = plan.parameters.len(),
            recipes = plan.recipes.len(),
            roles = plan.roles.len(),
            "Cloned stage"
        );

        self.store.load_snapshot(target).await
    }

    /// Create `new_stage` and clone `source` into it. The new stage is deleted
    /// again when the clone fails.
    pub async fn clone_stage(
        &self,
        new_stage: NewStage,
        source: &StageSnapshot,
    ) -> Result<StageSnapshot> {
        let target = self.store.create_stage(new_stage).await?;

        match self.clone_into(target.id, source).await {
            Ok(cloned) => Ok(cloned),
            Err(e) => {
                error!(source = %source.stage.id, target = %target.id, error = %e, "Clone failed, removing new stage");
                if let Err(cleanup) = self.store.delete_stage(target.id).await {
                    error!(target = %target.id, error = %cleanup, "Failed to remove new stage");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::ParameterOwner;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_clone_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let project = store.create_project("shop").await.unwrap();
        let host = store.create_host("web1.example.com").await.unwrap();
        let recipe = store.create_recipe("unicorn", None).await.unwrap();

        let source = store
            .create_stage(NewStage::new(project.id, "production"))
            .await
            .unwrap();
        store
            .set_parameter(
                ParameterOwner::Stage(source.id),
                NewParameter::new("branch", "main"),
            )
            .await
            .unwrap();
        store
            .set_parameter(
                ParameterOwner::Stage(source.id),
                NewParameter::new("password", "").prompted(),
            )
            .await
            .unwrap();
        let mut role = NewRole::new("app", host.id);
        role.primary = true;
        role.ssh_port = Some(2222);
        role.no_symlink = true;
        store.add_role(source.id, role).await.unwrap();
        store.attach_recipe(source.id, recipe.id).await.unwrap();

        let target = store
            .create_stage(NewStage::new(project.id, "staging"))
            .await
            .unwrap();

        let cloner = StageCloner::new(store.clone());
        let source_snapshot = store.load_snapshot(source.id).await.unwrap();
        let cloned = cloner.clone_into(target.id, &source_snapshot).await.unwrap();

        assert_eq!(cloned.stage.id, target.id);
        assert_eq!(cloned.parameters.len(), 2);
        for (copy, original) in cloned.parameters.iter().zip(&source_snapshot.parameters) {
            assert_eq!(copy.name, original.name);
            assert_eq!(copy.value, original.value);
            assert_eq!(copy.prompt_on_deploy, original.prompt_on_deploy);
            assert_eq!(copy.project_id, original.project_id);
            assert_eq!(copy.stage_id, Some(target.id));
            assert_ne!(copy.id, original.id);
        }

        assert_eq!(cloned.roles.len(), 1);
        let (copy, original) = (&cloned.roles[0], &source_snapshot.roles[0]);
        assert_ne!(copy.id, original.id);
        assert_eq!(NewRole::from(copy), NewRole::from(original));

        assert_eq!(cloned.recipes, source_snapshot.recipes);
    }

    #[tokio::test]
    async fn test_clone_replaces_target_contents_and_leaves_source_alone() {
        let store = Arc::new(MemoryStore::new());
        let project = store.create_project("shop").await.unwrap();
        let host = store.create_host("web1").await.unwrap();
        let old_recipe = store.create_recipe("legacy", None).await.unwrap();

        let source = store
            .create_stage(NewStage::new(project.id, "production"))
            .await
            .unwrap();
        store
            .set_parameter(
                ParameterOwner::Stage(source.id),
                NewParameter::new("branch", "main"),
            )
            .await
            .unwrap();

        let target = store
            .create_stage(NewStage::new(project.id, "staging"))
            .await
            .unwrap();
        store
            .set_parameter(
                ParameterOwner::Stage(target.id),
                NewParameter::new("stale", "yes"),
            )
            .await
            .unwrap();
        store
            .add_role(target.id, NewRole::new("old", host.id))
            .await
            .unwrap();
        store.attach_recipe(target.id, old_recipe.id).await.unwrap();

        let cloner = StageCloner::new(store.clone());
        let source_snapshot = store.load_snapshot(source.id).await.unwrap();
        let cloned = cloner.clone_into(target.id, &source_snapshot).await.unwrap();

        let names: Vec<_> = cloned.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["branch"]);
        assert!(cloned.roles.is_empty());
        assert!(cloned.recipes.is_empty());

        // Changing the copy must not reach the source.
        store
            .set_parameter(
                ParameterOwner::Stage(target.id),
                NewParameter::new("branch", "release"),
            )
            .await
            .unwrap();
        let source_after = store.load_snapshot(source.id).await.unwrap();
        assert_eq!(source_after.parameters[0].value, "main");
        assert_eq!(source_after.parameters, source_snapshot.parameters);
    }

    #[tokio::test]
    async fn test_clone_stage_creates_and_copies() {
        let store = Arc::new(MemoryStore::new());
        let project = store.create_project("shop").await.unwrap();
        let source = store
            .create_stage(NewStage::new(project.id, "production"))
            .await
            .unwrap();
        store
            .set_parameter(
                ParameterOwner::Stage(source.id),
                NewParameter::new("branch", "main"),
            )
            .await
            .unwrap();
        let source_snapshot = store.load_snapshot(source.id).await.unwrap();

        let mut new_stage = NewStage::new(project.id, "");
        new_stage.prepare_cloning(&source);
        let cloned = StageCloner::new(store.clone())
            .clone_stage(new_stage, &source_snapshot)
            .await
            .unwrap();

        assert_eq!(cloned.stage.name, "Clone of production");
        assert_eq!(cloned.effective_parameter("branch").unwrap().value, "main");
        assert_eq!(store.list_stages(project.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_clone_removes_new_stage() {
        let store = Arc::new(MemoryStore::new());
        let project = store.create_project("shop").await.unwrap();
        let source = store
            .create_stage(NewStage::new(project.id, "production"))
            .await
            .unwrap();
        let source_snapshot = store.load_snapshot(source.id).await.unwrap();
        store.fail("apply_clone");

        let mut new_stage = NewStage::new(project.id, "");
        new_stage.prepare_cloning(&source);
        let err = StageCloner::new(store.clone())
            .clone_stage(new_stage, &source_snapshot)
            .await
            .unwrap_err();

        assert!(matches!(err, crate::Error::Storage(_)));
        let stages = store.list_stages(project.id).await.unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].id, source.id);
    }

    #[test]
    fn test_plan_ignores_project_parameters() {
        let snapshot = StageSnapshot {
            stage: crate::stage::tests::stage(ProjectId::new(), "prod"),
            project_parameters: vec![crate::configuration::tests::param(
                ProjectId::new(),
                None,
                "repository",
                "git://x",
            )],
            parameters: vec![],
            roles: vec![],
            recipes: vec![],
        };

        assert_eq!(ClonePlan::from_snapshot(&snapshot), ClonePlan::default());
    }
}
