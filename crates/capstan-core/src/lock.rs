//! Mutual exclusion of deployments against a stage.
//!
//! Locking is a two-step protocol: [`StageLock::lock`] claims the stage with no
//! owner, then [`StageLock::lock_with`] attaches the deployment that holds it.
//! Each step re-reads the stage row under an exclusive row lock in the store,
//! so two callers racing on an unlocked stage cannot both observe the
//! `unlocked -> locked` transition. Attaching an owner and releasing on behalf
//! of a deployment are decided on that re-read row, never on the caller's copy.
//! The caller's copy of the stage is replaced with the persisted row after
//! every store call that finds it.

use std::sync::Arc;
use tracing::{info, warn};

use crate::deployment::Deployment;
use crate::stage::Stage;
use crate::store::{LockRelease, OwnerAttach, StageStore};
use crate::{Error, Result};

/// What a lock or unlock call did to the stored flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTransition {
    /// This call flipped the flag.
    Changed,
    /// The flag already had the requested value; nothing this caller can claim.
    Unchanged,
    /// The stage row is gone. Nothing was written and the caller's copy is untouched.
    Vanished,
}

pub struct StageLock {
    store: Arc<dyn StageStore>,
}

impl StageLock {
    pub fn new(store: Arc<dyn StageStore>) -> Self {
        Self { store }
    }

    /// Claim the stage. Only a [`LockTransition::Changed`] result means this
    /// caller won the lock.
    pub async fn lock(&self, stage: &mut Stage) -> Result<LockTransition> {
        self.set_locked(stage, true).await
    }

    /// Release the stage and clear its owning deployment.
    pub async fn unlock(&self, stage: &mut Stage) -> Result<LockTransition> {
        self.set_locked(stage, false).await
    }

    /// Attach `deployment` as the holder of an already-claimed lock.
    pub async fn lock_with(&self, stage: &mut Stage, deployment: &Deployment) -> Result<()> {
        if !stage.locked {
            return Err(Error::InvalidOperation(format!(
                "stage {} must be locked before attaching lock info",
                stage.id
            )));
        }

        if deployment.stage_id != stage.id {
            return Err(Error::DeploymentMismatch {
                deployment: deployment.id,
                stage: stage.id,
            });
        }

        let attached = self
            .store
            .set_lock_owner(stage.id, deployment.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("stage {}", stage.id)))?;

        match attached {
            OwnerAttach::Attached(fresh) => {
                info!(stage_id = %stage.id, deployment_id = %deployment.id, "Attached lock owner");
                *stage = fresh;
                Ok(())
            }
            OwnerAttach::NotLocked(current) => {
                warn!(
                    stage_id = %stage.id,
                    deployment_id = %deployment.id,
                    "Stage was unlocked before its owner could be attached"
                );
                *stage = current;
                Err(Error::InvalidOperation(format!(
                    "stage {} must be locked before attaching lock info",
                    stage.id
                )))
            }
        }
    }

    /// Release the stage held by `deployment`. Leaves the lock alone unless the
    /// stored row names `deployment` as its owner, so a claim made by another
    /// caller is never released.
    pub async fn release(&self, deployment: &Deployment) -> Result<LockTransition> {
        let stage_id = deployment.stage_id;
        let Some(release) = self.store.release_lock(stage_id, deployment.id).await? else {
            warn!(stage_id = %stage_id, deployment_id = %deployment.id, "Stage vanished before release");
            return Ok(LockTransition::Vanished);
        };

        match release {
            LockRelease::Released(_) => {
                info!(stage_id = %stage_id, deployment_id = %deployment.id, "Released stage");
                Ok(LockTransition::Changed)
            }
            LockRelease::NotHeld(current) => {
                warn!(
                    stage_id = %stage_id,
                    deployment_id = %deployment.id,
                    locked = current.locked,
                    owner = ?current.locked_by_deployment_id,
                    "Stage is not held by this deployment, leaving lock in place"
                );
                Ok(LockTransition::Unchanged)
            }
        }
    }

    async fn set_locked(&self, stage: &mut Stage, locked: bool) -> Result<LockTransition> {
        let Some(change) = self.store.set_locked(stage.id, locked).await? else {
            warn!(stage_id = %stage.id, locked, "Stage vanished while changing lock");
            return Ok(LockTransition::Vanished);
        };

        let transition = if change.was_locked != locked {
            LockTransition::Changed
        } else {
            LockTransition::Unchanged
        };

        info!(stage_id = %stage.id, locked, ?transition, "Stage lock updated");
        *stage = change.stage;
        Ok(transition)
    }
}
