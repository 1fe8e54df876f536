use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use orderly_core::activity::ActivityEvent;
use orderly_core::domain::actor::Actor;
use orderly_core::domain::supplier::{Supplier, SupplierId};
use orderly_core::errors::WorkflowError;

use super::{activity_log, parse_timestamp, RepositoryError};
use crate::DbPool;

#[async_trait::async_trait]
pub trait SupplierRepository: Send + Sync {
    async fn save(&self, supplier: Supplier, actor: &Actor) -> Result<(), WorkflowError>;
    async fn find_active(&self, id: &SupplierId) -> Result<Option<Supplier>, WorkflowError>;
    async fn list_active(&self) -> Result<Vec<Supplier>, WorkflowError>;
    async fn soft_delete(&self, id: &SupplierId, actor: &Actor) -> Result<(), WorkflowError>;
}

pub struct SqlSupplierRepository {
    pool: DbPool,
}

impl SqlSupplierRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SupplierRepository for SqlSupplierRepository {
    async fn save(&self, supplier: Supplier, actor: &Actor) -> Result<(), WorkflowError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        sqlx::query(
            "INSERT INTO supplier (
                id,
                name,
                email,
                phone,
                address,
                deleted,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                phone = excluded.phone,
                address = excluded.address,
                deleted = excluded.deleted",
        )
        .bind(&supplier.id.0)
        .bind(&supplier.name)
        .bind(supplier.email.as_deref())
        .bind(supplier.phone.as_deref())
        .bind(supplier.address.as_deref())
        .bind(supplier.deleted)
        .bind(supplier.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        let event = ActivityEvent::new(actor, format!("Supplier '{}' saved", supplier.name));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_active(&self, id: &SupplierId) -> Result<Option<Supplier>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_active_supplier(&mut conn, &id.0).await?)
    }

    async fn list_active(&self) -> Result<Vec<Supplier>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                name,
                email,
                phone,
                address,
                deleted,
                created_at
             FROM supplier
             WHERE deleted = 0
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(supplier_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WorkflowError::from)
    }

    async fn soft_delete(&self, id: &SupplierId, actor: &Actor) -> Result<(), WorkflowError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let supplier = fetch_active_supplier(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("supplier", &id.0))?;

        sqlx::query("UPDATE supplier SET deleted = 1 WHERE id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;

        let event = ActivityEvent::new(actor, format!("Supplier '{}' deleted", supplier.name));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }
}

pub(crate) async fn fetch_active_supplier(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Supplier>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            name,
            email,
            phone,
            address,
            deleted,
            created_at
         FROM supplier
         WHERE id = ? AND deleted = 0",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.map(supplier_from_row).transpose()
}

fn supplier_from_row(row: SqliteRow) -> Result<Supplier, RepositoryError> {
    Ok(Supplier {
        id: SupplierId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        deleted: row.try_get("deleted")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
