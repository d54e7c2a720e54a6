//! Database layer for Capstan.
//!
//! Row mappings and queries live in [`repo`]; [`PgStageStore`] implements the
//! core persistence trait on top of them.

pub mod error;
pub mod repo;
pub mod store;

pub use error::{DbError, DbResult};
pub use store::PgStageStore;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
