//! Hosts, recipes and roles.

use anyhow::Result;
use capstan_core::{NewRole, RecipeId, StageId};

use super::Context;

pub async fn create_host(ctx: &Context, name: &str) -> Result<()> {
    let host = ctx.store.create_host(name).await?;
    ctx.emit(&host, |h| format!("Created host {} ({})", h.name, h.id))
}

pub async fn create_recipe(ctx: &Context, name: &str, description: Option<&str>) -> Result<()> {
    let recipe = ctx.store.create_recipe(name, description).await?;
    ctx.emit(&recipe, |r| format!("Created recipe {} ({})", r.name, r.id))
}

pub async fn attach_recipe(ctx: &Context, stage_id: StageId, recipe_id: RecipeId) -> Result<()> {
    ctx.store.attach_recipe(stage_id, recipe_id).await?;
    ctx.emit(
        &serde_json::json!({ "stage_id": stage_id, "recipe_id": recipe_id }),
        |_| format!("Attached recipe {} to stage {}", recipe_id, stage_id),
    )
}

pub async fn add_role(ctx: &Context, stage_id: StageId, role: NewRole) -> Result<()> {
    let role = ctx.store.add_role(stage_id, role).await?;
    ctx.emit(&role, |r| {
        format!("Added role {} on host {} to stage {}", r.name, r.host_id, r.stage_id)
    })
}
