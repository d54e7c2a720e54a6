//! Recipes and their association with stages.

use capstan_core::{Recipe, RecipeId, StageId};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecipeRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<RecipeRow> for Recipe {
    fn from(row: RecipeRow) -> Self {
        Recipe {
            id: RecipeId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

pub async fn insert(
    conn: &mut PgConnection,
    name: &str,
    description: Option<&str>,
) -> DbResult<Recipe> {
    let row = sqlx::query_as::<_, RecipeRow>(
        r#"
        INSERT INTO recipes (id, name, description)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(RecipeId::new().as_uuid())
    .bind(name)
    .bind(description)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            DbError::Duplicate(format!("recipe {}", name))
        } else {
            e.into()
        }
    })?;
    Ok(row.into())
}

pub async fn exists(conn: &mut PgConnection, id: RecipeId) -> DbResult<bool> {
    let found: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM recipes WHERE id = $1)")
        .bind(id.as_uuid())
        .fetch_one(&mut *conn)
        .await?;
    Ok(found)
}

/// Link `recipe_id` to `stage_id`. Linking twice is a no-op.
pub async fn attach(conn: &mut PgConnection, stage_id: StageId, recipe_id: RecipeId) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO recipes_stages (recipe_id, stage_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(recipe_id.as_uuid())
    .bind(stage_id.as_uuid())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn detach_all(conn: &mut PgConnection, stage_id: StageId) -> DbResult<()> {
    sqlx::query("DELETE FROM recipes_stages WHERE stage_id = $1")
        .bind(stage_id.as_uuid())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn list_for_stage(conn: &mut PgConnection, stage_id: StageId) -> DbResult<Vec<Recipe>> {
    let rows = sqlx::query_as::<_, RecipeRow>(
        r#"
        SELECT r.* FROM recipes r
        JOIN recipes_stages rs ON rs.recipe_id = r.id
        WHERE rs.stage_id = $1
        ORDER BY r.name
        "#,
    )
    .bind(stage_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(Recipe::from).collect())
}
