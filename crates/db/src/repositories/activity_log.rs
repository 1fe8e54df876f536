use sqlx::{sqlite::SqliteRow, Row, Sqlite};

use orderly_core::activity::ActivityEvent;

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

#[async_trait::async_trait]
pub trait ActivityLogRepository: Send + Sync {
    async fn record(&self, event: ActivityEvent) -> Result<(), RepositoryError>;
    async fn list_recent(&self, limit: u32) -> Result<Vec<ActivityEvent>, RepositoryError>;
}

pub struct SqlActivityLogRepository {
    pool: DbPool,
}

impl SqlActivityLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ActivityLogRepository for SqlActivityLogRepository {
    async fn record(&self, event: ActivityEvent) -> Result<(), RepositoryError> {
        append(&self.pool, &event).await
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<ActivityEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                actor_id,
                actor_username,
                action,
                occurred_at
             FROM activity_log
             ORDER BY occurred_at DESC, id DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

/// Appends one activity row on the given executor, so workflow repositories
/// can stamp the entry inside their own transaction.
pub(crate) async fn append<'e, E>(executor: E, event: &ActivityEvent) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO activity_log (
            id,
            actor_id,
            actor_username,
            action,
            occurred_at
         ) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&event.id)
    .bind(&event.actor_id)
    .bind(&event.actor_username)
    .bind(&event.action)
    .bind(event.occurred_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

/// Best-effort append: an audit failure must not mask the primary outcome.
pub(crate) async fn append_best_effort<'e, E>(executor: E, event: &ActivityEvent)
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    if let Err(error) = append(executor, event).await {
        tracing::warn!(action = %event.action, %error, "activity log write failed");
    }
}

fn event_from_row(row: SqliteRow) -> Result<ActivityEvent, RepositoryError> {
    Ok(ActivityEvent {
        id: row.try_get("id")?,
        actor_id: row.try_get("actor_id")?,
        actor_username: row.try_get("actor_username")?,
        action: row.try_get("action")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
