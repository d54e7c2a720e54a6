//! Project commands.

use anyhow::Result;

use super::Context;

pub async fn create(ctx: &Context, name: &str) -> Result<()> {
    let project = ctx.store.create_project(name).await?;
    ctx.emit(&project, |p| format!("Created project {} ({})", p.name, p.id))
}

pub async fn list(ctx: &Context) -> Result<()> {
    let projects = ctx.store.list_projects().await?;
    ctx.emit(&projects, |projects| {
        if projects.is_empty() {
            return "No projects".to_string();
        }
        projects
            .iter()
            .map(|p| format!("{}  {}", p.id, p.name))
            .collect::<Vec<_>>()
            .join("\n")
    })
}
