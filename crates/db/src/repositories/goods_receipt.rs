use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use orderly_core::activity::ActivityEvent;
use orderly_core::domain::actor::Actor;
use orderly_core::domain::product::{ProductId, StockLocation};
use orderly_core::domain::stock::{
    ensure_sufficient_stock, GoodsReceipt, GoodsReceiptDraft, GoodsReceiptId, GoodsReceiptItem,
    GoodsReceiptItemId,
};
use orderly_core::domain::supplier::SupplierId;
use orderly_core::errors::WorkflowError;
use orderly_core::money;

use super::{
    activity_log, parse_decimal, parse_optional_timestamp, parse_timestamp, parse_u32, product,
    supplier, RepositoryError,
};
use crate::{begin_immediate, DbPool};

#[async_trait::async_trait]
pub trait GoodsReceiptRepository: Send + Sync {
    async fn create(
        &self,
        draft: GoodsReceiptDraft,
        actor: &Actor,
    ) -> Result<GoodsReceipt, WorkflowError>;

    /// Credits every item quantity to warehouse stock, once.
    async fn verify(
        &self,
        id: &GoodsReceiptId,
        actor: &Actor,
    ) -> Result<GoodsReceipt, WorkflowError>;

    /// Un-credits the warehouse first when the receipt was already verified.
    async fn soft_delete(&self, id: &GoodsReceiptId, actor: &Actor)
        -> Result<(), WorkflowError>;

    async fn find_by_id(&self, id: &GoodsReceiptId)
        -> Result<Option<GoodsReceipt>, WorkflowError>;

    async fn list_active(&self) -> Result<Vec<GoodsReceipt>, WorkflowError>;
}

pub struct SqlGoodsReceiptRepository {
    pool: DbPool,
}

impl SqlGoodsReceiptRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl GoodsReceiptRepository for SqlGoodsReceiptRepository {
    async fn create(
        &self,
        draft: GoodsReceiptDraft,
        actor: &Actor,
    ) -> Result<GoodsReceipt, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let supplier = supplier::fetch_active_supplier(&mut tx, &draft.supplier_id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("supplier", &draft.supplier_id.0))?;

        if let Some(reference) = draft.reference.as_deref() {
            let existing: Option<String> = sqlx::query_scalar(
                "SELECT id FROM goods_receipt WHERE deleted = 0 AND reference = ?",
            )
            .bind(reference)
            .fetch_optional(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
            if existing.is_some() {
                return Err(WorkflowError::conflict("Receipt reference already in use"));
            }
        }

        let mut items: Vec<GoodsReceiptItem> = Vec::with_capacity(draft.items.len());
        for line in &draft.items {
            if line.quantity == 0 {
                return Err(WorkflowError::validation("Quantity must be positive"));
            }
            if line.unit_cost < Decimal::ZERO {
                return Err(WorkflowError::validation("Unit cost cannot be negative"));
            }
            product::fetch_active_product(&mut tx, &line.product_id.0)
                .await?
                .ok_or_else(|| WorkflowError::not_found("product", &line.product_id.0))?;

            items.push(GoodsReceiptItem {
                id: GoodsReceiptItemId(format!("grnitem-{}", sqlx::types::Uuid::new_v4())),
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                unit_cost: line.unit_cost,
                total: money::line_total(line.quantity, line.unit_cost),
            });
        }

        let receipt = GoodsReceipt {
            id: GoodsReceiptId(format!("grn-{}", sqlx::types::Uuid::new_v4())),
            supplier_id: supplier.id.clone(),
            reference: draft.reference,
            notes: draft.notes,
            sub_total: money::round2(items.iter().map(|item| item.total).sum()),
            verified: false,
            deleted: false,
            created_at: Utc::now(),
            verified_at: None,
            items,
        };

        insert_receipt_row(&mut tx, &receipt).await?;
        for item in &receipt.items {
            insert_item_row(&mut tx, &receipt.id.0, item).await?;
        }

        let event = ActivityEvent::new(
            actor,
            format!("Goods receipt from supplier '{}' recorded", supplier.name),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(receipt)
    }

    async fn verify(
        &self,
        id: &GoodsReceiptId,
        actor: &Actor,
    ) -> Result<GoodsReceipt, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut receipt = fetch_receipt(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("goods receipt", &id.0))?;
        receipt.ensure_can_verify()?;

        for item in &receipt.items {
            let item_product = product::fetch_active_product(&mut tx, &item.product_id.0)
                .await?
                .ok_or_else(|| WorkflowError::not_found("product", &item.product_id.0))?;
            product::store_stock_levels(
                &mut tx,
                &item_product.id.0,
                item_product.quantity_showroom,
                item_product.quantity_warehouse.saturating_add(item.quantity),
            )
            .await?;
        }

        receipt.verified = true;
        receipt.verified_at = Some(Utc::now());
        update_receipt_row(&mut tx, &receipt).await?;

        let event =
            ActivityEvent::new(actor, format!("Goods receipt '{}' verified", receipt.id.0));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(receipt)
    }

    async fn soft_delete(
        &self,
        id: &GoodsReceiptId,
        actor: &Actor,
    ) -> Result<(), WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut receipt = fetch_receipt(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("goods receipt", &id.0))?;

        if receipt.verified {
            for item in &receipt.items {
                let item_product = product::fetch_active_product(&mut tx, &item.product_id.0)
                    .await?
                    .ok_or_else(|| WorkflowError::not_found("product", &item.product_id.0))?;
                ensure_sufficient_stock(&item_product, StockLocation::Warehouse, item.quantity)?;
                product::store_stock_levels(
                    &mut tx,
                    &item_product.id.0,
                    item_product.quantity_showroom,
                    item_product.quantity_warehouse - item.quantity,
                )
                .await?;
            }
        }

        receipt.deleted = true;
        update_receipt_row(&mut tx, &receipt).await?;

        let event =
            ActivityEvent::new(actor, format!("Goods receipt '{}' deleted", receipt.id.0));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &GoodsReceiptId,
    ) -> Result<Option<GoodsReceipt>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_receipt(&mut conn, &id.0).await?)
    }

    async fn list_active(&self) -> Result<Vec<GoodsReceipt>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                supplier_id,
                reference,
                notes,
                CAST(sub_total AS TEXT) AS sub_total,
                verified,
                deleted,
                created_at,
                verified_at
             FROM goods_receipt
             WHERE deleted = 0
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let mut receipts = Vec::with_capacity(rows.len());
        for row in rows {
            let mut receipt = receipt_from_row(row)?;
            receipt.items = fetch_items(&mut conn, &receipt.id.0).await?;
            receipts.push(receipt);
        }
        Ok(receipts)
    }
}

async fn fetch_receipt(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<GoodsReceipt>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            supplier_id,
            reference,
            notes,
            CAST(sub_total AS TEXT) AS sub_total,
            verified,
            deleted,
            created_at,
            verified_at
         FROM goods_receipt
         WHERE id = ? AND deleted = 0",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut receipt = receipt_from_row(row)?;
    receipt.items = fetch_items(conn, &receipt.id.0).await?;
    Ok(Some(receipt))
}

async fn fetch_items(
    conn: &mut SqliteConnection,
    receipt_id: &str,
) -> Result<Vec<GoodsReceiptItem>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT
            id,
            product_id,
            quantity,
            CAST(unit_cost AS TEXT) AS unit_cost,
            CAST(total AS TEXT) AS total
         FROM goods_receipt_item
         WHERE receipt_id = ?
         ORDER BY rowid ASC",
    )
    .bind(receipt_id)
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(item_from_row).collect()
}

async fn insert_receipt_row(
    conn: &mut SqliteConnection,
    receipt: &GoodsReceipt,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO goods_receipt (
            id,
            supplier_id,
            reference,
            notes,
            sub_total,
            verified,
            deleted,
            created_at,
            verified_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&receipt.id.0)
    .bind(&receipt.supplier_id.0)
    .bind(receipt.reference.as_deref())
    .bind(receipt.notes.as_deref())
    .bind(receipt.sub_total.to_string())
    .bind(receipt.verified)
    .bind(receipt.deleted)
    .bind(receipt.created_at.to_rfc3339())
    .bind(receipt.verified_at.map(|at| at.to_rfc3339()))
    .execute(conn)
    .await?;

    Ok(())
}

async fn update_receipt_row(
    conn: &mut SqliteConnection,
    receipt: &GoodsReceipt,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE goods_receipt SET
            verified = ?,
            deleted = ?,
            verified_at = ?
         WHERE id = ?",
    )
    .bind(receipt.verified)
    .bind(receipt.deleted)
    .bind(receipt.verified_at.map(|at| at.to_rfc3339()))
    .bind(&receipt.id.0)
    .execute(conn)
    .await?;

    Ok(())
}

async fn insert_item_row(
    conn: &mut SqliteConnection,
    receipt_id: &str,
    item: &GoodsReceiptItem,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO goods_receipt_item (
            id,
            receipt_id,
            product_id,
            quantity,
            unit_cost,
            total
         ) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&item.id.0)
    .bind(receipt_id)
    .bind(&item.product_id.0)
    .bind(i64::from(item.quantity))
    .bind(item.unit_cost.to_string())
    .bind(item.total.to_string())
    .execute(conn)
    .await?;

    Ok(())
}

fn receipt_from_row(row: SqliteRow) -> Result<GoodsReceipt, RepositoryError> {
    Ok(GoodsReceipt {
        id: GoodsReceiptId(row.try_get("id")?),
        supplier_id: SupplierId(row.try_get("supplier_id")?),
        reference: row.try_get("reference")?,
        notes: row.try_get("notes")?,
        sub_total: parse_decimal("sub_total", row.try_get("sub_total")?)?,
        verified: row.try_get("verified")?,
        deleted: row.try_get("deleted")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        verified_at: parse_optional_timestamp("verified_at", row.try_get("verified_at")?)?,
        items: Vec::new(),
    })
}

fn item_from_row(row: SqliteRow) -> Result<GoodsReceiptItem, RepositoryError> {
    Ok(GoodsReceiptItem {
        id: GoodsReceiptItemId(row.try_get("id")?),
        product_id: ProductId(row.try_get("product_id")?),
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        unit_cost: parse_decimal("unit_cost", row.try_get("unit_cost")?)?,
        total: parse_decimal("total", row.try_get("total")?)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use orderly_core::domain::actor::Actor;
    use orderly_core::domain::product::Product;
    use orderly_core::domain::stock::{GoodsReceiptDraft, GoodsReceiptItemDraft};
    use orderly_core::domain::supplier::{Supplier, SupplierId};
    use orderly_core::errors::WorkflowError;

    use super::{GoodsReceiptRepository, SqlGoodsReceiptRepository};
    use crate::repositories::{
        ProductRepository, SqlProductRepository, SqlSupplierRepository, SupplierRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    #[tokio::test]
    async fn create_records_header_and_items_without_touching_stock() {
        let pool = setup_pool().await;
        let repo = SqlGoodsReceiptRepository::new(pool.clone());
        let products = SqlProductRepository::new(pool.clone());
        let actor = Actor::system();

        let supplier = seeded_supplier(&pool).await;
        let chair = seeded_product(&pool, "Teak Chair").await;
        let table = seeded_product(&pool, "Dining Table").await;

        let receipt = repo
            .create(
                GoodsReceiptDraft {
                    supplier_id: supplier.id.clone(),
                    reference: Some("GRN-2026-07".to_owned()),
                    notes: Some("July consignment".to_owned()),
                    items: vec![
                        GoodsReceiptItemDraft {
                            product_id: chair.id.clone(),
                            quantity: 5,
                            unit_cost: Decimal::new(30000, 2),
                        },
                        GoodsReceiptItemDraft {
                            product_id: table.id.clone(),
                            quantity: 2,
                            unit_cost: Decimal::new(70000, 2),
                        },
                    ],
                },
                &actor,
            )
            .await
            .expect("create receipt");

        assert_eq!(receipt.sub_total, Decimal::new(290000, 2));
        assert!(!receipt.verified);
        assert_eq!(receipt.items.len(), 2);
        assert_eq!(receipt.items[0].total, Decimal::new(150000, 2));

        let untouched = products
            .find_active(&chair.id)
            .await
            .expect("find product")
            .expect("product exists");
        assert_eq!(untouched.quantity_warehouse, 0);

        let found = repo.find_by_id(&receipt.id).await.expect("find receipt");
        assert_eq!(found, Some(receipt.clone()));
        assert_eq!(repo.list_active().await.expect("list").len(), 1);

        let duplicate_reference = repo
            .create(
                GoodsReceiptDraft {
                    supplier_id: supplier.id.clone(),
                    reference: Some("GRN-2026-07".to_owned()),
                    notes: None,
                    items: vec![GoodsReceiptItemDraft {
                        product_id: chair.id.clone(),
                        quantity: 1,
                        unit_cost: Decimal::new(30000, 2),
                    }],
                },
                &actor,
            )
            .await;
        assert!(matches!(duplicate_reference, Err(WorkflowError::Conflict { .. })));

        let unknown_supplier = repo
            .create(
                GoodsReceiptDraft {
                    supplier_id: SupplierId("sup-absent".to_owned()),
                    reference: None,
                    notes: None,
                    items: vec![GoodsReceiptItemDraft {
                        product_id: chair.id.clone(),
                        quantity: 1,
                        unit_cost: Decimal::new(30000, 2),
                    }],
                },
                &actor,
            )
            .await;
        assert!(matches!(unknown_supplier, Err(WorkflowError::NotFound { .. })));

        let zero_quantity = repo
            .create(
                GoodsReceiptDraft {
                    supplier_id: supplier.id.clone(),
                    reference: None,
                    notes: None,
                    items: vec![GoodsReceiptItemDraft {
                        product_id: chair.id.clone(),
                        quantity: 0,
                        unit_cost: Decimal::new(30000, 2),
                    }],
                },
                &actor,
            )
            .await;
        assert!(matches!(zero_quantity, Err(WorkflowError::Validation { .. })));

        pool.close().await;
    }

    #[tokio::test]
    async fn verify_credits_the_warehouse_once() {
        let pool = setup_pool().await;
        let repo = SqlGoodsReceiptRepository::new(pool.clone());
        let products = SqlProductRepository::new(pool.clone());
        let actor = Actor::system();

        let supplier = seeded_supplier(&pool).await;
        let chair = seeded_product(&pool, "Teak Chair").await;

        let receipt = repo
            .create(
                GoodsReceiptDraft {
                    supplier_id: supplier.id.clone(),
                    reference: None,
                    notes: None,
                    items: vec![GoodsReceiptItemDraft {
                        product_id: chair.id.clone(),
                        quantity: 5,
                        unit_cost: Decimal::new(30000, 2),
                    }],
                },
                &actor,
            )
            .await
            .expect("create receipt");

        let verified = repo.verify(&receipt.id, &actor).await.expect("verify receipt");
        assert!(verified.verified);
        assert!(verified.verified_at.is_some());

        let restocked = products
            .find_active(&chair.id)
            .await
            .expect("find product")
            .expect("product exists");
        assert_eq!(restocked.quantity_warehouse, 5);
        assert_eq!(restocked.quantity_showroom, 0);

        let again = repo.verify(&receipt.id, &actor).await;
        assert!(matches!(again, Err(WorkflowError::Conflict { .. })));
        let unchanged = products
            .find_active(&chair.id)
            .await
            .expect("find product")
            .expect("product exists");
        assert_eq!(unchanged.quantity_warehouse, 5);

        pool.close().await;
    }

    #[tokio::test]
    async fn soft_delete_reverts_a_verified_credit() {
        let pool = setup_pool().await;
        let repo = SqlGoodsReceiptRepository::new(pool.clone());
        let products = SqlProductRepository::new(pool.clone());
        let actor = Actor::system();

        let supplier = seeded_supplier(&pool).await;
        let chair = seeded_product(&pool, "Teak Chair").await;

        let receipt = repo
            .create(
                GoodsReceiptDraft {
                    supplier_id: supplier.id.clone(),
                    reference: None,
                    notes: None,
                    items: vec![GoodsReceiptItemDraft {
                        product_id: chair.id.clone(),
                        quantity: 5,
                        unit_cost: Decimal::new(30000, 2),
                    }],
                },
                &actor,
            )
            .await
            .expect("create receipt");
        repo.verify(&receipt.id, &actor).await.expect("verify receipt");

        repo.soft_delete(&receipt.id, &actor).await.expect("delete receipt");
        let reverted = products
            .find_active(&chair.id)
            .await
            .expect("find product")
            .expect("product exists");
        assert_eq!(reverted.quantity_warehouse, 0);
        assert_eq!(repo.find_by_id(&receipt.id).await.expect("find receipt"), None);

        pool.close().await;
    }

    #[tokio::test]
    async fn revert_is_blocked_when_the_credit_was_already_consumed() {
        let pool = setup_pool().await;
        let repo = SqlGoodsReceiptRepository::new(pool.clone());
        let products = SqlProductRepository::new(pool.clone());
        let actor = Actor::system();

        let supplier = seeded_supplier(&pool).await;
        let chair = seeded_product(&pool, "Teak Chair").await;

        let receipt = repo
            .create(
                GoodsReceiptDraft {
                    supplier_id: supplier.id.clone(),
                    reference: None,
                    notes: None,
                    items: vec![GoodsReceiptItemDraft {
                        product_id: chair.id.clone(),
                        quantity: 5,
                        unit_cost: Decimal::new(30000, 2),
                    }],
                },
                &actor,
            )
            .await
            .expect("create receipt");
        repo.verify(&receipt.id, &actor).await.expect("verify receipt");

        // Most of the credited units have since left the warehouse.
        let mut drained = products
            .find_active(&chair.id)
            .await
            .expect("find product")
            .expect("product exists");
        drained.quantity_warehouse = 2;
        products.save(drained, &actor).await.expect("drain warehouse");

        let blocked = repo.soft_delete(&receipt.id, &actor).await;
        assert_eq!(
            blocked,
            Err(WorkflowError::validation("Insufficient warehouse stock. Available: 2"))
        );
        assert!(repo.find_by_id(&receipt.id).await.expect("find receipt").is_some());

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn seeded_supplier(pool: &DbPool) -> Supplier {
        let supplier = Supplier::new("Malabar Timber Co");
        SqlSupplierRepository::new(pool.clone())
            .save(supplier.clone(), &Actor::system())
            .await
            .expect("seed supplier");
        supplier
    }

    async fn seeded_product(pool: &DbPool, name: &str) -> Product {
        let product = Product::new(name, Decimal::new(50000, 2));
        SqlProductRepository::new(pool.clone())
            .save(product.clone(), &Actor::system())
            .await
            .expect("seed product");
        product
    }
}
