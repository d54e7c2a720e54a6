//! Starting and finishing deployments.
//!
//! A deployment may only start when the stage passes the readiness check and
//! this caller wins the stage lock. The lock is then attributed to the
//! recorded deployment and released again when the deployment finishes.

use std::sync::Arc;
use tracing::{error, info};

use crate::deployment::{Deployment, DeploymentStatus, NewDeployment};
use crate::lock::{LockTransition, StageLock};
use crate::readiness::ReadinessChecker;
use crate::stage::Stage;
use crate::store::StageStore;
use crate::{Error, Result};

pub struct DeploymentGate {
    store: Arc<dyn StageStore>,
    checker: ReadinessChecker,
    lock: StageLock,
}

impl DeploymentGate {
    pub fn new(store: Arc<dyn StageStore>, checker: ReadinessChecker) -> Self {
        let lock = StageLock::new(store.clone());
        Self {
            store,
            checker,
            lock,
        }
    }

    /// Check, lock, record and attribute a deployment of `request.stage_id`.
    pub async fn begin(&self, request: NewDeployment) -> Result<Deployment> {
        let snapshot = self.store.load_snapshot(request.stage_id).await?;

        let problems = self.checker.deployment_problems(&snapshot);
        if !problems.is_empty() {
            return Err(Error::NotDeployable(problems));
        }

        let mut stage = snapshot.stage;
        match self.lock.lock(&mut stage).await? {
            LockTransition::Changed => {}
            LockTransition::Unchanged => return Err(Error::StageLocked(stage.id)),
            LockTransition::Vanished => {
                return Err(Error::NotFound(format!("stage {}", stage.id)));
            }
        }

        match self.record(&mut stage, request).await {
            Ok(deployment) => {
                info!(
                    stage_id = %stage.id,
                    deployment_id = %deployment.id,
                    task = %deployment.task,
                    "Deployment started"
                );
                Ok(deployment)
            }
            Err(e) => {
                error!(stage_id = %stage.id, error = %e, "Failed to start deployment, releasing lock");
                if let Err(unlock_err) = self.lock.unlock(&mut stage).await {
                    error!(stage_id = %stage.id, error = %unlock_err, "Failed to release lock");
                }
                Err(e)
            }
        }
    }

    /// Record the outcome of `deployment` and release the stage if the stored
    /// row still names it as the lock owner.
    pub async fn finish(
        &self,
        deployment: &Deployment,
        status: DeploymentStatus,
    ) -> Result<Deployment> {
        if !status.is_terminal() {
            return Err(Error::InvalidOperation(format!(
                "cannot finish deployment {} with status {}",
                deployment.id, status
            )));
        }

        let finished = self.store.finish_deployment(deployment.id, status).await?;
        self.lock.release(deployment).await?;

        info!(deployment_id = %finished.id, status = %finished.status, "Deployment finished");
        Ok(finished)
    }

    async fn record(&self, stage: &mut Stage, request: NewDeployment) -> Result<Deployment> {
        let deployment = self.store.create_deployment(request).await?;
        self.lock.lock_with(stage, &deployment).await?;
        Ok(deployment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::{NewParameter, ParameterOwner};
    use crate::memory::MemoryStore;
    use crate::stage::{LockState, NewRole, NewStage};

    async fn ready_stage(store: &MemoryStore) -> Stage {
        let project = store.create_project("shop").await.unwrap();
        for (name, value) in [("repository", "git@example.com:shop.git"), ("application", "shop")] {
            store
                .set_parameter(
                    ParameterOwner::Project(project.id),
                    NewParameter::new(name, value),
                )
                .await
                .unwrap();
        }
        let stage = store
            .create_stage(NewStage::new(project.id, "production"))
            .await
            .unwrap();
        let host = store.create_host("web1").await.unwrap();
        store
            .add_role(stage.id, NewRole::new("app", host.id))
            .await
            .unwrap();
        stage
    }

    #[tokio::test]
    async fn test_begin_and_finish() {
        let store = Arc::new(MemoryStore::new());
        let stage = ready_stage(&store).await;
        let gate = DeploymentGate::new(store.clone(), ReadinessChecker::default());

        let deployment = gate
            .begin(NewDeployment::new(stage.id, "deploy"))
            .await
            .unwrap();
        assert_eq!(
            store.get_stage(stage.id).await.unwrap().lock_state(),
            LockState::Locked {
                owner: Some(deployment.id)
            }
        );

        let finished = gate
            .finish(&deployment, DeploymentStatus::Success)
            .await
            .unwrap();
        assert_eq!(finished.status, DeploymentStatus::Success);
        assert!(finished.completed_at.is_some());
        assert_eq!(
            store.get_stage(stage.id).await.unwrap().lock_state(),
            LockState::Unlocked
        );

        let recent = store.recent_deployments(stage.id, 3).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, deployment.id);
    }

    #[tokio::test]
    async fn test_begin_refuses_unready_stage() {
        let store = Arc::new(MemoryStore::new());
        let project = store.create_project("shop").await.unwrap();
        let stage = store
            .create_stage(NewStage::new(project.id, "production"))
            .await
            .unwrap();
        let gate = DeploymentGate::new(store.clone(), ReadinessChecker::default());

        let err = gate
            .begin(NewDeployment::new(stage.id, "deploy"))
            .await
            .unwrap_err();
        match err {
            Error::NotDeployable(problems) => {
                assert!(problems.contains("roles"));
                assert!(problems.contains("repository"));
                assert!(problems.contains("application"));
            }
            other => panic!("expected NotDeployable, got {:?}", other),
        }
        assert!(!store.get_stage(stage.id).await.unwrap().locked);
    }

    #[tokio::test]
    async fn test_second_begin_is_refused_while_locked() {
        let store = Arc::new(MemoryStore::new());
        let stage = ready_stage(&store).await;
        let gate = DeploymentGate::new(store.clone(), ReadinessChecker::default());

        let (a, b) = tokio::join!(
            gate.begin(NewDeployment::new(stage.id, "deploy")),
            gate.begin(NewDeployment::new(stage.id, "deploy:migrations")),
        );
        let results = [a, b];
        let started: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(started.len(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(Error::StageLocked(id)) if *id == stage.id))
        );

        let held = store.get_stage(stage.id).await.unwrap();
        assert_eq!(held.locked_by_deployment_id, Some(started[0].id));
    }

    #[tokio::test]
    async fn test_finish_leaves_a_fresh_unowned_claim_alone() {
        let store = Arc::new(MemoryStore::new());
        let stage = ready_stage(&store).await;
        let gate = DeploymentGate::new(store.clone(), ReadinessChecker::default());
        let lock = StageLock::new(store.clone());

        let first = gate
            .begin(NewDeployment::new(stage.id, "deploy"))
            .await
            .unwrap();

        // An operator force-unlocks and another caller claims the stage
        // before attaching its own deployment.
        let mut operator_view = store.get_stage(stage.id).await.unwrap();
        lock.unlock(&mut operator_view).await.unwrap();
        let mut claimant_view = store.get_stage(stage.id).await.unwrap();
        assert_eq!(
            lock.lock(&mut claimant_view).await.unwrap(),
            LockTransition::Changed
        );

        gate.finish(&first, DeploymentStatus::Success).await.unwrap();
        assert_eq!(
            store.get_stage(stage.id).await.unwrap().lock_state(),
            LockState::Locked { owner: None }
        );

        let err = gate
            .begin(NewDeployment::new(stage.id, "deploy"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StageLocked(id) if id == stage.id));
    }

    #[tokio::test]
    async fn test_finish_of_non_owner_keeps_current_owner() {
        let store = Arc::new(MemoryStore::new());
        let stage = ready_stage(&store).await;
        let gate = DeploymentGate::new(store.clone(), ReadinessChecker::default());

        let first = gate
            .begin(NewDeployment::new(stage.id, "deploy"))
            .await
            .unwrap();
        let mut operator_view = store.get_stage(stage.id).await.unwrap();
        StageLock::new(store.clone())
            .unlock(&mut operator_view)
            .await
            .unwrap();
        let second = gate
            .begin(NewDeployment::new(stage.id, "deploy"))
            .await
            .unwrap();

        let finished = gate.finish(&first, DeploymentStatus::Failed).await.unwrap();
        assert_eq!(finished.status, DeploymentStatus::Failed);
        assert_eq!(
            store.get_stage(stage.id).await.unwrap().lock_state(),
            LockState::Locked {
                owner: Some(second.id)
            }
        );
    }

    #[tokio::test]
    async fn test_stale_locked_copy_cannot_attach_to_unlocked_stage() {
        let store = Arc::new(MemoryStore::new());
        let stage = ready_stage(&store).await;
        let gate = DeploymentGate::new(store.clone(), ReadinessChecker::default());
        let lock = StageLock::new(store.clone());

        let mut claimant_view = store.get_stage(stage.id).await.unwrap();
        lock.lock(&mut claimant_view).await.unwrap();
        let mut operator_view = store.get_stage(stage.id).await.unwrap();
        lock.unlock(&mut operator_view).await.unwrap();

        let late = store
            .create_deployment(NewDeployment::new(stage.id, "deploy"))
            .await
            .unwrap();
        assert!(claimant_view.locked);
        let err = lock.lock_with(&mut claimant_view, &late).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        let stored = store.get_stage(stage.id).await.unwrap();
        assert_eq!(stored.lock_state(), LockState::Unlocked);

        // The stage is free, so the next deployment takes it cleanly.
        let next = gate
            .begin(NewDeployment::new(stage.id, "deploy"))
            .await
            .unwrap();
        assert_eq!(
            store.get_stage(stage.id).await.unwrap().lock_state(),
            LockState::Locked {
                owner: Some(next.id)
            }
        );
    }

    #[tokio::test]
    async fn test_begin_releases_lock_when_recording_fails() {
        let store = Arc::new(MemoryStore::new());
        let stage = ready_stage(&store).await;
        let gate = DeploymentGate::new(store.clone(), ReadinessChecker::default());
        store.fail("create_deployment");

        let err = gate
            .begin(NewDeployment::new(stage.id, "deploy"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(
            store.get_stage(stage.id).await.unwrap().lock_state(),
            LockState::Unlocked
        );
        assert!(store.recent_deployments(stage.id, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finish_requires_terminal_status() {
        let store = Arc::new(MemoryStore::new());
        let stage = ready_stage(&store).await;
        let gate = DeploymentGate::new(store.clone(), ReadinessChecker::default());
        let deployment = gate
            .begin(NewDeployment::new(stage.id, "deploy"))
            .await
            .unwrap();

        let err = gate
            .finish(&deployment, DeploymentStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(store.get_stage(stage.id).await.unwrap().locked);
    }
}
