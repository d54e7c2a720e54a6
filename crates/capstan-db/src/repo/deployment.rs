//! Deployment records.

use capstan_core::{Deployment, DeploymentId, DeploymentStatus, NewDeployment, StageId};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeploymentRow {
    pub id: Uuid,
    pub stage_id: Uuid,
    pub task: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = DbError;

    fn try_from(row: DeploymentRow) -> Result<Self, Self::Error> {
        let status: DeploymentStatus = row.status.parse().map_err(DbError::InvalidData)?;

        Ok(Deployment {
            id: DeploymentId::from_uuid(row.id),
            stage_id: StageId::from_uuid(row.stage_id),
            task: row.task,
            description: row.description,
            status,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

/// Record a deployment as running.
pub async fn insert(conn: &mut PgConnection, deployment: &NewDeployment) -> DbResult<Deployment> {
    let row = sqlx::query_as::<_, DeploymentRow>(
        r#"
        INSERT INTO deployments (id, stage_id, task, description, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(DeploymentId::new().as_uuid())
    .bind(deployment.stage_id.as_uuid())
    .bind(&deployment.task)
    .bind(&deployment.description)
    .bind(DeploymentStatus::Running.to_string())
    .fetch_one(&mut *conn)
    .await?;
    row.try_into()
}

pub async fn get(conn: &mut PgConnection, id: DeploymentId) -> DbResult<Deployment> {
    sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("deployment {}", id)))?
        .try_into()
}

pub async fn finish(
    conn: &mut PgConnection,
    id: DeploymentId,
    status: DeploymentStatus,
) -> DbResult<Deployment> {
    sqlx::query_as::<_, DeploymentRow>(
        r#"
        UPDATE deployments
        SET status = $2, completed_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id.as_uuid())
    .bind(status.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::NotFound(format!("deployment {}", id)))?
    .try_into()
}

/// Newest first.
pub async fn recent(conn: &mut PgConnection, stage_id: StageId, limit: i64) -> DbResult<Vec<Deployment>> {
    let rows = sqlx::query_as::<_, DeploymentRow>(
        r#"
        SELECT * FROM deployments
        WHERE stage_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(stage_id.as_uuid())
    .bind(limit.max(0))
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(Deployment::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> DeploymentRow {
        DeploymentRow {
            id: Uuid::now_v7(),
            stage_id: Uuid::now_v7(),
            task: "deploy".to_string(),
            description: None,
            status: status.to_string(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn test_status_mapping() {
        let deployment = Deployment::try_from(row("canceled")).unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Canceled);
        assert!(matches!(
            Deployment::try_from(row("exploded")).unwrap_err(),
            DbError::InvalidData(_)
        ));
    }
}
