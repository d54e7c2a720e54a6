//! Deployment commands.

use anyhow::Result;
use capstan_core::{DeploymentGate, DeploymentId, DeploymentStatus, NewDeployment, StageId};

use super::Context;

fn gate(ctx: &Context) -> DeploymentGate {
    DeploymentGate::new(ctx.store.clone(), ctx.config.readiness.checker())
}

pub async fn begin(
    ctx: &Context,
    stage_id: StageId,
    task: String,
    description: Option<String>,
) -> Result<()> {
    let mut request = NewDeployment::new(stage_id, task);
    request.description = description;

    let deployment = gate(ctx).begin(request).await?;
    ctx.emit(&deployment, |d| {
        format!("Started {} on stage {} as deployment {}", d.task, d.stage_id, d.id)
    })
}

pub async fn finish(ctx: &Context, id: DeploymentId, status: DeploymentStatus) -> Result<()> {
    let deployment = ctx.store.get_deployment(id).await?;
    let finished = gate(ctx).finish(&deployment, status).await?;
    ctx.emit(&finished, |d| format!("Deployment {} finished: {}", d.id, d.status))
}
