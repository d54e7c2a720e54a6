//! Hosts.

use capstan_core::{Host, HostId};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HostRow {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<HostRow> for Host {
    fn from(row: HostRow) -> Self {
        Host {
            id: HostId::from_uuid(row.id),
            name: row.name,
            created_at: row.created_at,
        }
    }
}

pub async fn insert(conn: &mut PgConnection, name: &str) -> DbResult<Host> {
    let row = sqlx::query_as::<_, HostRow>(
        "INSERT INTO hosts (id, name) VALUES ($1, $2) RETURNING *",
    )
    .bind(HostId::new().as_uuid())
    .bind(name)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            DbError::Duplicate(format!("host {}", name))
        } else {
            e.into()
        }
    })?;
    Ok(row.into())
}
