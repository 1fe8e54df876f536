use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use orderly_core::activity::ActivityEvent;
use orderly_core::domain::actor::Actor;
use orderly_core::domain::product::{Product, ProductId, StockLocation};
use orderly_core::domain::stock::{
    ensure_sufficient_stock, StockTransfer, StockTransferDraft, StockTransferId, TransferStatus,
};
use orderly_core::errors::WorkflowError;

use super::{
    activity_log, parse_optional_timestamp, parse_timestamp, parse_u32, product, RepositoryError,
};
use crate::{begin_immediate, DbPool};

#[async_trait::async_trait]
pub trait StockTransferRepository: Send + Sync {
    /// Records the intent to move stock. Levels stay untouched until completion.
    async fn create(
        &self,
        draft: StockTransferDraft,
        actor: &Actor,
    ) -> Result<StockTransfer, WorkflowError>;

    /// Moves the stock. Source sufficiency is re-checked at completion time,
    /// not trusted from creation.
    async fn complete(
        &self,
        id: &StockTransferId,
        actor: &Actor,
    ) -> Result<StockTransfer, WorkflowError>;

    /// Moves the stock back first when the transfer already completed.
    async fn soft_delete(&self, id: &StockTransferId, actor: &Actor)
        -> Result<(), WorkflowError>;

    async fn find_by_id(&self, id: &StockTransferId)
        -> Result<Option<StockTransfer>, WorkflowError>;

    async fn list_active(&self) -> Result<Vec<StockTransfer>, WorkflowError>;
}

pub struct SqlStockTransferRepository {
    pool: DbPool,
}

impl SqlStockTransferRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StockTransferRepository for SqlStockTransferRepository {
    async fn create(
        &self,
        draft: StockTransferDraft,
        actor: &Actor,
    ) -> Result<StockTransfer, WorkflowError> {
        draft.validate()?;

        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let product = product::fetch_active_product(&mut tx, &draft.product_id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("product", &draft.product_id.0))?;
        ensure_sufficient_stock(&product, draft.from_location, draft.quantity)?;

        let transfer = StockTransfer {
            id: StockTransferId(format!("xfer-{}", sqlx::types::Uuid::new_v4())),
            product_id: product.id.clone(),
            from_location: draft.from_location,
            to_location: draft.to_location,
            quantity: draft.quantity,
            status: TransferStatus::Pending,
            notes: draft.notes,
            deleted: false,
            created_at: Utc::now(),
            completed_at: None,
        };
        insert_transfer_row(&mut tx, &transfer).await?;

        let event = ActivityEvent::new(
            actor,
            format!(
                "Stock transfer of {} x '{}' created ({} to {})",
                transfer.quantity,
                product.name,
                transfer.from_location.as_str(),
                transfer.to_location.as_str()
            ),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(transfer)
    }

    async fn complete(
        &self,
        id: &StockTransferId,
        actor: &Actor,
    ) -> Result<StockTransfer, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut transfer = fetch_transfer(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("stock transfer", &id.0))?;
        transfer.ensure_can_complete()?;

        let product = product::fetch_active_product(&mut tx, &transfer.product_id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("product", &transfer.product_id.0))?;
        ensure_sufficient_stock(&product, transfer.from_location, transfer.quantity)?;

        let (showroom, warehouse) = shifted_levels(
            &product,
            transfer.from_location,
            transfer.to_location,
            transfer.quantity,
        );
        product::store_stock_levels(&mut tx, &product.id.0, showroom, warehouse).await?;

        transfer.status = TransferStatus::Completed;
        transfer.completed_at = Some(Utc::now());
        update_transfer_row(&mut tx, &transfer).await?;

        let event = ActivityEvent::new(
            actor,
            format!("Stock transfer '{}' completed", transfer.id.0),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(transfer)
    }

    async fn soft_delete(
        &self,
        id: &StockTransferId,
        actor: &Actor,
    ) -> Result<(), WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut transfer = fetch_transfer(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("stock transfer", &id.0))?;

        if transfer.status == TransferStatus::Completed {
            let product = product::fetch_active_product(&mut tx, &transfer.product_id.0)
                .await?
                .ok_or_else(|| WorkflowError::not_found("product", &transfer.product_id.0))?;
            ensure_sufficient_stock(&product, transfer.to_location, transfer.quantity)?;
            let (showroom, warehouse) = shifted_levels(
                &product,
                transfer.to_location,
                transfer.from_location,
                transfer.quantity,
            );
            product::store_stock_levels(&mut tx, &product.id.0, showroom, warehouse).await?;
        }

        transfer.deleted = true;
        update_transfer_row(&mut tx, &transfer).await?;

        let event = ActivityEvent::new(
            actor,
            format!("Stock transfer '{}' deleted", transfer.id.0),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &StockTransferId,
    ) -> Result<Option<StockTransfer>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_transfer(&mut conn, &id.0).await?)
    }

    async fn list_active(&self) -> Result<Vec<StockTransfer>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                product_id,
                from_location,
                to_location,
                quantity,
                status,
                notes,
                deleted,
                created_at,
                completed_at
             FROM stock_transfer
             WHERE deleted = 0
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(transfer_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WorkflowError::from)
    }
}

fn shifted_levels(
    product: &Product,
    from: StockLocation,
    to: StockLocation,
    quantity: u32,
) -> (u32, u32) {
    let mut showroom = product.quantity_showroom;
    let mut warehouse = product.quantity_warehouse;
    match from {
        StockLocation::Showroom => showroom -= quantity,
        StockLocation::Warehouse => warehouse -= quantity,
    }
    match to {
        StockLocation::Showroom => showroom = showroom.saturating_add(quantity),
        StockLocation::Warehouse => warehouse = warehouse.saturating_add(quantity),
    }
    (showroom, warehouse)
}

async fn fetch_transfer(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<StockTransfer>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            product_id,
            from_location,
            to_location,
            quantity,
            status,
            notes,
            deleted,
            created_at,
            completed_at
         FROM stock_transfer
         WHERE id = ? AND deleted = 0",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.map(transfer_from_row).transpose()
}

async fn insert_transfer_row(
    conn: &mut SqliteConnection,
    transfer: &StockTransfer,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO stock_transfer (
            id,
            product_id,
            from_location,
            to_location,
            quantity,
            status,
            notes,
            deleted,
            created_at,
            completed_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&transfer.id.0)
    .bind(&transfer.product_id.0)
    .bind(transfer.from_location.as_str())
    .bind(transfer.to_location.as_str())
    .bind(i64::from(transfer.quantity))
    .bind(transfer.status.as_str())
    .bind(transfer.notes.as_deref())
    .bind(transfer.deleted)
    .bind(transfer.created_at.to_rfc3339())
    .bind(transfer.completed_at.map(|at| at.to_rfc3339()))
    .execute(conn)
    .await?;

    Ok(())
}

async fn update_transfer_row(
    conn: &mut SqliteConnection,
    transfer: &StockTransfer,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE stock_transfer SET
            status = ?,
            deleted = ?,
            completed_at = ?
         WHERE id = ?",
    )
    .bind(transfer.status.as_str())
    .bind(transfer.deleted)
    .bind(transfer.completed_at.map(|at| at.to_rfc3339()))
    .bind(&transfer.id.0)
    .execute(conn)
    .await?;

    Ok(())
}

fn transfer_from_row(row: SqliteRow) -> Result<StockTransfer, RepositoryError> {
    let from_raw: String = row.try_get("from_location")?;
    let from_location = StockLocation::parse(&from_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown stock location `{from_raw}`")))?;
    let to_raw: String = row.try_get("to_location")?;
    let to_location = StockLocation::parse(&to_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown stock location `{to_raw}`")))?;
    let status_raw: String = row.try_get("status")?;
    let status = TransferStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown transfer status `{status_raw}`"))
    })?;

    Ok(StockTransfer {
        id: StockTransferId(row.try_get("id")?),
        product_id: ProductId(row.try_get("product_id")?),
        from_location,
        to_location,
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        status,
        notes: row.try_get("notes")?,
        deleted: row.try_get("deleted")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
    })
}
