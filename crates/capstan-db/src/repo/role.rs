//! Roles binding stages to hosts.

use capstan_core::{HostId, NewRole, Role, RoleId, StageId};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{DbError, DbResult};

/// Database row for roles. `primary` is a reserved word, hence `is_primary`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoleRow {
    pub id: Uuid,
    pub stage_id: Uuid,
    pub host_id: Uuid,
    pub name: String,
    pub is_primary: bool,
    pub no_release: bool,
    pub no_symlink: bool,
    pub ssh_port: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RoleRow> for Role {
    type Error = DbError;

    fn try_from(row: RoleRow) -> Result<Self, Self::Error> {
        let ssh_port = row
            .ssh_port
            .map(u16::try_from)
            .transpose()
            .map_err(|_| DbError::InvalidData(format!("role {}: ssh_port out of range", row.id)))?;

        Ok(Role {
            id: RoleId::from_uuid(row.id),
            stage_id: StageId::from_uuid(row.stage_id),
            host_id: HostId::from_uuid(row.host_id),
            name: row.name,
            primary: row.is_primary,
            no_release: row.no_release,
            no_symlink: row.no_symlink,
            ssh_port,
            created_at: row.created_at,
        })
    }
}

pub async fn insert(conn: &mut PgConnection, stage_id: StageId, role: &NewRole) -> DbResult<Role> {
    let row = sqlx::query_as::<_, RoleRow>(
        r#"
        INSERT INTO roles (id, stage_id, host_id, name, is_primary, no_release, no_symlink, ssh_port)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(RoleId::new().as_uuid())
    .bind(stage_id.as_uuid())
    .bind(role.host_id.as_uuid())
    .bind(&role.name)
    .bind(role.primary)
    .bind(role.no_release)
    .bind(role.no_symlink)
    .bind(role.ssh_port.map(i32::from))
    .fetch_one(&mut *conn)
    .await?;
    row.try_into()
}

pub async fn delete_all_for_stage(conn: &mut PgConnection, stage_id: StageId) -> DbResult<()> {
    sqlx::query("DELETE FROM roles WHERE stage_id = $1")
        .bind(stage_id.as_uuid())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn list_for_stage(conn: &mut PgConnection, stage_id: StageId) -> DbResult<Vec<Role>> {
    let rows = sqlx::query_as::<_, RoleRow>(
        "SELECT * FROM roles WHERE stage_id = $1 ORDER BY name, created_at, id",
    )
    .bind(stage_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(Role::try_from).collect()
}
