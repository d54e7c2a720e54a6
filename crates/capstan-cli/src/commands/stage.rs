//! Stage commands.

use anyhow::Result;
use capstan_core::tasks::list_tasks;
use capstan_core::{
    ConfigurationParameter, Deployment, DeploymentId, DeploymentProblems, HostId, LockState,
    LockTransition, NewStage, ProjectId, StageCloner, StageId, StageLock, StageSnapshot,
    TaskDescriptor,
};
use capstan_runner::CapistranoRunner;
use serde::Serialize;
use std::fmt::Write as _;

use super::Context;

/// What `stage show` prints.
#[derive(Serialize)]
struct StageReport<'a> {
    id: StageId,
    project_id: ProjectId,
    project: String,
    name: &'a str,
    normalized_name: String,
    emails: Vec<String>,
    lock: LockState,
    configuration: Vec<&'a ConfigurationParameter>,
    hosts: Vec<HostId>,
    recipes: Vec<&'a str>,
    recent_deployments: Vec<Deployment>,
    deployable: bool,
    problems: DeploymentProblems,
}

#[derive(Serialize)]
struct LockReport {
    stage_id: StageId,
    transition: &'static str,
    lock: LockState,
}

pub async fn create(
    ctx: &Context,
    project_id: ProjectId,
    name: String,
    alert_emails: Option<String>,
) -> Result<()> {
    let mut new_stage = NewStage::new(project_id, name);
    new_stage.alert_emails = alert_emails;
    let stage = ctx.store.create_stage(new_stage).await?;
    ctx.emit(&stage, |s| format!("Created stage {} ({})", s.name, s.id))
}

pub async fn list(ctx: &Context, project_id: ProjectId) -> Result<()> {
    let stages = ctx.store.list_stages(project_id).await?;
    ctx.emit(&stages, |stages| {
        if stages.is_empty() {
            return "No stages".to_string();
        }
        stages
            .iter()
            .map(|s| {
                let lock = if s.locked { "  [locked]" } else { "" };
                format!("{}  {}{}", s.id, s.name, lock)
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

pub async fn show(ctx: &Context, id: StageId) -> Result<()> {
    let snapshot = ctx.store.load_snapshot(id).await?;
    let project = ctx.store.get_project(snapshot.stage.project_id).await?;
    let recent_deployments = ctx
        .store
        .recent_deployments(id, ctx.config.deployments.recent_limit)
        .await?;
    let problems = ctx.config.readiness.checker().deployment_problems(&snapshot);

    let report = StageReport {
        id,
        project_id: snapshot.stage.project_id,
        project: project.name,
        name: &snapshot.stage.name,
        normalized_name: snapshot.stage.normalized_name(),
        emails: snapshot.stage.emails(),
        lock: snapshot.stage.lock_state(),
        configuration: snapshot.effective_configuration(),
        hosts: snapshot.hosts(),
        recipes: snapshot.recipes.iter().map(|r| r.name.as_str()).collect(),
        recent_deployments,
        deployable: problems.is_empty(),
        problems,
    };

    ctx.emit(&report, render_report)
}

fn render_report(report: &StageReport<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Stage {} ({})", report.name, report.id);
    let _ = writeln!(out, "  project: {} ({})", report.project, report.project_id);
    let _ = writeln!(out, "  normalized name: {}", report.normalized_name);
    let _ = writeln!(out, "  lock: {}", render_lock(report.lock));
    if !report.emails.is_empty() {
        let _ = writeln!(out, "  alert emails: {}", report.emails.join(", "));
    }

    let _ = writeln!(out, "  configuration:");
    for parameter in &report.configuration {
        let value = if parameter.prompt_on_deploy {
            "<prompt on deploy>"
        } else {
            parameter.value.as_str()
        };
        let _ = writeln!(
            out,
            "    {} = {}  ({})",
            parameter.name,
            value,
            parameter.scope()
        );
    }

    let _ = writeln!(out, "  hosts: {}", report.hosts.len());
    if !report.recipes.is_empty() {
        let _ = writeln!(out, "  recipes: {}", report.recipes.join(", "));
    }

    let _ = writeln!(out, "  recent deployments:");
    for deployment in &report.recent_deployments {
        let _ = writeln!(
            out,
            "    {}  {}  {}  {}",
            deployment.created_at.format("%Y-%m-%d %H:%M:%S"),
            deployment.task,
            deployment.status,
            deployment.id
        );
    }

    if report.deployable {
        let _ = write!(out, "  deployable: yes");
    } else {
        let _ = write!(out, "  deployable: no\n{}", render_problems(&report.problems));
    }
    out
}

fn render_lock(lock: LockState) -> String {
    match lock {
        LockState::Unlocked => "unlocked".to_string(),
        LockState::Locked { owner: None } => "locked".to_string(),
        LockState::Locked { owner: Some(id) } => format!("locked by deployment {}", id),
    }
}

fn render_problems(problems: &DeploymentProblems) -> String {
    problems
        .iter()
        .map(|(key, message)| format!("    {}: {}", key, message))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn check(ctx: &Context, id: StageId) -> Result<()> {
    let snapshot = ctx.store.load_snapshot(id).await?;
    let checker = ctx.config.readiness.checker();
    let problems = checker.deployment_problems(&snapshot);
    let required = checker
        .required()
        .iter()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    ctx.emit(&problems, |problems| {
        if problems.is_empty() {
            format!(
                "Stage {} is ready to deploy (required: {})",
                snapshot.stage.name, required
            )
        } else {
            format!(
                "Stage {} cannot be deployed:\n{}",
                snapshot.stage.name,
                render_problems(problems)
            )
        }
    })?;

    if !problems.is_empty() {
        anyhow::bail!("stage {} is not deployable", snapshot.stage.name);
    }
    Ok(())
}

pub async fn lock(ctx: &Context, id: StageId) -> Result<()> {
    let mut stage = ctx.store.get_stage(id).await?;
    let transition = StageLock::new(ctx.store.clone()).lock(&mut stage).await?;
    emit_lock(ctx, id, transition, stage.lock_state())
}

pub async fn unlock(ctx: &Context, id: StageId) -> Result<()> {
    let mut stage = ctx.store.get_stage(id).await?;
    let transition = StageLock::new(ctx.store.clone()).unlock(&mut stage).await?;
    emit_lock(ctx, id, transition, stage.lock_state())
}

pub async fn lock_with(ctx: &Context, id: StageId, deployment_id: DeploymentId) -> Result<()> {
    let mut stage = ctx.store.get_stage(id).await?;
    let deployment = ctx.store.get_deployment(deployment_id).await?;
    StageLock::new(ctx.store.clone())
        .lock_with(&mut stage, &deployment)
        .await?;
    emit_lock(ctx, id, LockTransition::Changed, stage.lock_state())
}

fn emit_lock(
    ctx: &Context,
    stage_id: StageId,
    transition: LockTransition,
    lock: LockState,
) -> Result<()> {
    let transition = match transition {
        LockTransition::Changed => "changed",
        LockTransition::Unchanged => "unchanged",
        LockTransition::Vanished => "vanished",
    };
    let report = LockReport {
        stage_id,
        transition,
        lock,
    };
    ctx.emit(&report, |r| {
        format!("Stage {}: {} ({})", r.stage_id, render_lock(r.lock), r.transition)
    })
}

pub async fn clone(ctx: &Context, source_id: StageId, name: Option<String>) -> Result<()> {
    let source = ctx.store.load_snapshot(source_id).await?;

    let mut new_stage = NewStage::new(source.stage.project_id, "");
    new_stage.prepare_cloning(&source.stage);
    if let Some(name) = name {
        new_stage.name = name;
    }
    let cloned = StageCloner::new(ctx.store.clone())
        .clone_stage(new_stage, &source)
        .await?;
    ctx.emit(&cloned, |c: &StageSnapshot| {
        format!(
            "Cloned {} into {} ({}): {} parameters, {} roles, {} recipes",
            source.stage.name,
            c.stage.name,
            c.stage.id,
            c.parameters.len(),
            c.roles.len(),
            c.recipes.len()
        )
    })
}

pub async fn tasks(ctx: &Context, id: StageId) -> Result<()> {
    let snapshot = ctx.store.load_snapshot(id).await?;
    let settings = &ctx.config.task_runner;
    let mut runner = CapistranoRunner::new(settings.program.clone())
        .with_args(settings.args.iter().cloned())
        .with_timeout(settings.timeout());
    if let Some(dir) = &settings.working_dir {
        runner = runner.with_working_dir(dir.clone());
    }

    let tasks = list_tasks(&runner, &snapshot).await;
    ctx.emit(&tasks, |tasks: &Vec<TaskDescriptor>| {
        let width = tasks.iter().map(|t| t.name.len()).max().unwrap_or(0);
        tasks
            .iter()
            .map(|t| format!("{:width$}  # {}", t.name, t.description, width = width))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

pub async fn delete(ctx: &Context, id: StageId) -> Result<()> {
    ctx.store.delete_stage(id).await?;
    ctx.emit(&serde_json::json!({ "deleted": id }), |_| {
        format!("Deleted stage {}", id)
    })
}
