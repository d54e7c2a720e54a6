//! Configuration parameters.
//!
//! Project parameters have a NULL `stage_id`. Stage parameters carry both ids.

use capstan_core::{
    ConfigurationParameter, NewParameter, ParameterId, ProjectId, StageId,
};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::DbResult;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ParameterRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub stage_id: Option<Uuid>,
    pub name: String,
    pub value: String,
    pub prompt_on_deploy: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ParameterRow> for ConfigurationParameter {
    fn from(row: ParameterRow) -> Self {
        ConfigurationParameter {
            id: ParameterId::from_uuid(row.id),
            name: row.name,
            value: row.value,
            project_id: ProjectId::from_uuid(row.project_id),
            stage_id: row.stage_id.map(StageId::from_uuid),
            prompt_on_deploy: row.prompt_on_deploy,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Insert or replace the project parameter named `parameter.name`.
pub async fn upsert_project(
    conn: &mut PgConnection,
    project_id: ProjectId,
    parameter: &NewParameter,
) -> DbResult<ConfigurationParameter> {
    let row = sqlx::query_as::<_, ParameterRow>(
        r#"
        INSERT INTO configuration_parameters (id, project_id, stage_id, name, value, prompt_on_deploy)
        VALUES ($1, $2, NULL, $3, $4, $5)
        ON CONFLICT (project_id, name) WHERE stage_id IS NULL
        DO UPDATE SET value = EXCLUDED.value,
                      prompt_on_deploy = EXCLUDED.prompt_on_deploy,
                      updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(ParameterId::new().as_uuid())
    .bind(project_id.as_uuid())
    .bind(&parameter.name)
    .bind(&parameter.value)
    .bind(parameter.prompt_on_deploy)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.into())
}

/// Insert or replace the stage parameter named `parameter.name`.
pub async fn upsert_stage(
    conn: &mut PgConnection,
    project_id: ProjectId,
    stage_id: StageId,
    parameter: &NewParameter,
) -> DbResult<ConfigurationParameter> {
    let row = sqlx::query_as::<_, ParameterRow>(
        r#"
        INSERT INTO configuration_parameters (id, project_id, stage_id, name, value, prompt_on_deploy)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (stage_id, name) WHERE stage_id IS NOT NULL
        DO UPDATE SET value = EXCLUDED.value,
                      prompt_on_deploy = EXCLUDED.prompt_on_deploy,
                      updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(ParameterId::new().as_uuid())
    .bind(project_id.as_uuid())
    .bind(stage_id.as_uuid())
    .bind(&parameter.name)
    .bind(&parameter.value)
    .bind(parameter.prompt_on_deploy)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.into())
}

pub async fn delete_project(conn: &mut PgConnection, project_id: ProjectId, name: &str) -> DbResult<()> {
    sqlx::query(
        "DELETE FROM configuration_parameters WHERE project_id = $1 AND stage_id IS NULL AND name = $2",
    )
    .bind(project_id.as_uuid())
    .bind(name)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_stage(conn: &mut PgConnection, stage_id: StageId, name: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM configuration_parameters WHERE stage_id = $1 AND name = $2")
        .bind(stage_id.as_uuid())
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_all_for_stage(conn: &mut PgConnection, stage_id: StageId) -> DbResult<()> {
    sqlx::query("DELETE FROM configuration_parameters WHERE stage_id = $1")
        .bind(stage_id.as_uuid())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn list_for_project(
    conn: &mut PgConnection,
    project_id: ProjectId,
) -> DbResult<Vec<ConfigurationParameter>> {
    let rows = sqlx::query_as::<_, ParameterRow>(
        r#"
        SELECT * FROM configuration_parameters
        WHERE project_id = $1 AND stage_id IS NULL
        ORDER BY name
        "#,
    )
    .bind(project_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(ConfigurationParameter::from).collect())
}

pub async fn list_for_stage(
    conn: &mut PgConnection,
    stage_id: StageId,
) -> DbResult<Vec<ConfigurationParameter>> {
    let rows = sqlx::query_as::<_, ParameterRow>(
        "SELECT * FROM configuration_parameters WHERE stage_id = $1 ORDER BY name",
    )
    .bind(stage_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(ConfigurationParameter::from).collect())
}
