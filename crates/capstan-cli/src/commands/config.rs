//! Configuration parameter commands.

use anyhow::Result;
use capstan_core::{NewParameter, ParameterOwner};

use super::Context;

pub async fn set(
    ctx: &Context,
    owner: ParameterOwner,
    name: String,
    value: String,
    prompt: bool,
) -> Result<()> {
    let mut parameter = NewParameter::new(name, value);
    if prompt {
        parameter = parameter.prompted();
    }
    let saved = ctx.store.set_parameter(owner, parameter).await?;
    ctx.emit(&saved, |p| {
        if p.prompt_on_deploy {
            format!("Set {} parameter {} (prompt on deploy)", p.scope(), p.name)
        } else {
            format!("Set {} parameter {} = {}", p.scope(), p.name, p.value)
        }
    })
}

pub async fn unset(ctx: &Context, owner: ParameterOwner, name: &str) -> Result<()> {
    ctx.store.delete_parameter(owner, name).await?;
    ctx.emit(&serde_json::json!({ "removed": name }), |_| {
        format!("Removed parameter {}", name)
    })
}
