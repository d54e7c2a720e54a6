//! CLI command implementations.

pub mod config;
pub mod deploy;
pub mod inventory;
pub mod project;
pub mod stage;

use anyhow::{Context as _, Result};
use capstan_config::SystemConfig;
use capstan_core::StageStore;
use capstan_db::PgStageStore;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

/// Everything a command needs.
pub struct Context {
    pub config: SystemConfig,
    pub store: Arc<dyn StageStore>,
    pool: PgPool,
    json: bool,
}

impl Context {
    pub async fn connect(config: SystemConfig, json: bool) -> Result<Self> {
        let pool = capstan_db::create_pool(&config.database.url, config.database.max_connections)
            .await
            .context("failed to connect to database")?;
        let store: Arc<dyn StageStore> = Arc::new(PgStageStore::new(pool.clone()));
        Ok(Self {
            config,
            store,
            pool,
            json,
        })
    }

    /// Print `value` as JSON with `--json`, otherwise as `text` renders it.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text(value));
        }
        Ok(())
    }
}

pub async fn migrate(ctx: &Context) -> Result<()> {
    capstan_db::run_migrations(&ctx.pool).await?;
    info!("Migrations applied");
    ctx.emit(&serde_json::json!({ "migrated": true }), |_| {
        "Migrations applied".to_string()
    })
}
