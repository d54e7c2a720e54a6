//! Projects.

use capstan_core::{Project, ProjectId};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{DbError, DbResult};

/// Database row for projects.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: ProjectId::from_uuid(row.id),
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub async fn insert(conn: &mut PgConnection, name: &str) -> DbResult<Project> {
    let row = sqlx::query_as::<_, ProjectRow>(
        r#"
        INSERT INTO projects (id, name)
        VALUES ($1, $2)
        RETURNING *
        "#,
    )
    .bind(ProjectId::new().as_uuid())
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.into())
}

pub async fn get(conn: &mut PgConnection, id: ProjectId) -> DbResult<Project> {
    sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        .map(Project::from)
        .ok_or_else(|| DbError::NotFound(format!("project {}", id)))
}

pub async fn list(conn: &mut PgConnection) -> DbResult<Vec<Project>> {
    let rows = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects ORDER BY name, id")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(Project::from).collect())
}
