//! Stages and their lock columns.

use capstan_core::validation::parse_locked_flag;
use capstan_core::{DeploymentId, NewStage, ProjectId, Stage, StageId, ValidationErrors};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{DbError, DbResult};

/// Database row for stages. `locked` is stored as 0/1.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StageRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub alert_emails: Option<String>,
    pub locked: i16,
    pub locked_by_deployment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<StageRow> for Stage {
    type Error = DbError;

    fn try_from(row: StageRow) -> Result<Self, Self::Error> {
        let locked = parse_locked_flag(i64::from(row.locked)).map_err(|e| {
            let mut errors = ValidationErrors::new();
            errors.push(e);
            DbError::Validation(errors)
        })?;

        Ok(Stage {
            id: StageId::from_uuid(row.id),
            project_id: ProjectId::from_uuid(row.project_id),
            name: row.name,
            alert_emails: row.alert_emails,
            locked,
            locked_by_deployment_id: row.locked_by_deployment_id.map(DeploymentId::from_uuid),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn insert(conn: &mut PgConnection, stage: &NewStage) -> DbResult<Stage> {
    let row = sqlx::query_as::<_, StageRow>(
        r#"
        INSERT INTO stages (id, project_id, name, alert_emails, locked)
        VALUES ($1, $2, $3, $4, 0)
        RETURNING *
        "#,
    )
    .bind(StageId::new().as_uuid())
    .bind(stage.project_id.as_uuid())
    .bind(&stage.name)
    .bind(&stage.alert_emails)
    .fetch_one(&mut *conn)
    .await?;
    row.try_into()
}

pub async fn name_taken(conn: &mut PgConnection, project_id: ProjectId, name: &str) -> DbResult<bool> {
    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM stages WHERE project_id = $1 AND name = $2)",
    )
    .bind(project_id.as_uuid())
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;
    Ok(taken)
}

pub async fn find(conn: &mut PgConnection, id: StageId) -> DbResult<Option<Stage>> {
    sqlx::query_as::<_, StageRow>("SELECT * FROM stages WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        .map(Stage::try_from)
        .transpose()
}

pub async fn get(conn: &mut PgConnection, id: StageId) -> DbResult<Stage> {
    find(conn, id)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("stage {}", id)))
}

/// Read the stage and hold an exclusive row lock until the transaction ends.
pub async fn find_for_update(conn: &mut PgConnection, id: StageId) -> DbResult<Option<Stage>> {
    sqlx::query_as::<_, StageRow>("SELECT * FROM stages WHERE id = $1 FOR UPDATE")
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        .map(Stage::try_from)
        .transpose()
}

pub async fn list(conn: &mut PgConnection, project_id: ProjectId) -> DbResult<Vec<Stage>> {
    let rows = sqlx::query_as::<_, StageRow>(
        "SELECT * FROM stages WHERE project_id = $1 ORDER BY name",
    )
    .bind(project_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(Stage::try_from).collect()
}

/// Returns whether a row was deleted.
pub async fn delete(conn: &mut PgConnection, id: StageId) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM stages WHERE id = $1")
        .bind(id.as_uuid())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Write the lock flag. Clearing it also clears the owner.
pub async fn update_locked(conn: &mut PgConnection, id: StageId, locked: bool) -> DbResult<Stage> {
    let row = sqlx::query_as::<_, StageRow>(
        r#"
        UPDATE stages
        SET locked = $2,
            locked_by_deployment_id = CASE WHEN $2 = 1 THEN locked_by_deployment_id END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id.as_uuid())
    .bind(i16::from(locked))
    .fetch_one(&mut *conn)
    .await?;
    row.try_into()
}

pub async fn update_lock_owner(
    conn: &mut PgConnection,
    id: StageId,
    deployment: DeploymentId,
) -> DbResult<Stage> {
    let row = sqlx::query_as::<_, StageRow>(
        r#"
        UPDATE stages
        SET locked_by_deployment_id = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id.as_uuid())
    .bind(deployment.as_uuid())
    .fetch_one(&mut *conn)
    .await?;
    row.try_into()
}
