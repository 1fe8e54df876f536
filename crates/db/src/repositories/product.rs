use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use orderly_core::activity::ActivityEvent;
use orderly_core::domain::actor::Actor;
use orderly_core::domain::product::{Product, ProductId};
use orderly_core::errors::WorkflowError;

use super::{activity_log, parse_decimal, parse_timestamp, parse_u32, RepositoryError};
use crate::DbPool;

#[async_trait::async_trait]
pub trait ProductRepository: Send + Sync {
    async fn save(&self, product: Product, actor: &Actor) -> Result<(), WorkflowError>;
    async fn find_active(&self, id: &ProductId) -> Result<Option<Product>, WorkflowError>;
    async fn list_active(&self) -> Result<Vec<Product>, WorkflowError>;
    /// Surviving products whose combined stock sits at or below their
    /// configured minimum.
    async fn list_below_threshold(&self) -> Result<Vec<Product>, WorkflowError>;
    async fn soft_delete(&self, id: &ProductId, actor: &Actor) -> Result<(), WorkflowError>;
}

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn save(&self, product: Product, actor: &Actor) -> Result<(), WorkflowError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        sqlx::query(
            "INSERT INTO product (
                id,
                name,
                category,
                price,
                quantity_showroom,
                quantity_warehouse,
                min_stock_threshold,
                deleted,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                price = excluded.price,
                quantity_showroom = excluded.quantity_showroom,
                quantity_warehouse = excluded.quantity_warehouse,
                min_stock_threshold = excluded.min_stock_threshold,
                deleted = excluded.deleted,
                updated_at = excluded.updated_at",
        )
        .bind(&product.id.0)
        .bind(&product.name)
        .bind(product.category.as_deref())
        .bind(product.price.to_string())
        .bind(i64::from(product.quantity_showroom))
        .bind(i64::from(product.quantity_warehouse))
        .bind(i64::from(product.min_stock_threshold))
        .bind(product.deleted)
        .bind(product.created_at.to_rfc3339())
        .bind(product.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        let event = ActivityEvent::new(actor, format!("Product '{}' saved", product.name));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_active(&self, id: &ProductId) -> Result<Option<Product>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_active_product(&mut conn, &id.0).await?)
    }

    async fn list_active(&self) -> Result<Vec<Product>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                name,
                category,
                CAST(price AS TEXT) AS price,
                quantity_showroom,
                quantity_warehouse,
                min_stock_threshold,
                deleted,
                created_at,
                updated_at
             FROM product
             WHERE deleted = 0
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WorkflowError::from)
    }

    async fn list_below_threshold(&self) -> Result<Vec<Product>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                name,
                category,
                CAST(price AS TEXT) AS price,
                quantity_showroom,
                quantity_warehouse,
                min_stock_threshold,
                deleted,
                created_at,
                updated_at
             FROM product
             WHERE deleted = 0
               AND quantity_showroom + quantity_warehouse <= min_stock_threshold
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WorkflowError::from)
    }

    async fn soft_delete(&self, id: &ProductId, actor: &Actor) -> Result<(), WorkflowError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let product = fetch_active_product(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("product", &id.0))?;

        sqlx::query("UPDATE product SET deleted = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;

        let event = ActivityEvent::new(actor, format!("Product '{}' deleted", product.name));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }
}

pub(crate) async fn fetch_active_product(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Product>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            name,
            category,
            CAST(price AS TEXT) AS price,
            quantity_showroom,
            quantity_warehouse,
            min_stock_threshold,
            deleted,
            created_at,
            updated_at
         FROM product
         WHERE id = ? AND deleted = 0",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.map(product_from_row).transpose()
}

/// Writes back both live-stock counters. Callers compute the new levels in
/// the same transaction as the read, so the update never applies a stale
/// snapshot.
pub(crate) async fn store_stock_levels(
    conn: &mut SqliteConnection,
    id: &str,
    quantity_showroom: u32,
    quantity_warehouse: u32,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE product
         SET quantity_showroom = ?, quantity_warehouse = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(i64::from(quantity_showroom))
    .bind(i64::from(quantity_warehouse))
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(conn)
    .await?;

    Ok(())
}

fn product_from_row(row: SqliteRow) -> Result<Product, RepositoryError> {
    Ok(Product {
        id: ProductId(row.try_get("id")?),
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        price: parse_decimal("price", row.try_get("price")?)?,
        quantity_showroom: parse_u32("quantity_showroom", row.try_get("quantity_showroom")?)?,
        quantity_warehouse: parse_u32("quantity_warehouse", row.try_get("quantity_warehouse")?)?,
        min_stock_threshold: parse_u32("min_stock_threshold", row.try_get("min_stock_threshold")?)?,
        deleted: row.try_get("deleted")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
