use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use orderly_core::activity::ActivityEvent;
use orderly_core::domain::actor::Actor;
use orderly_core::domain::customer::CustomerId;
use orderly_core::domain::product::ProductId;
use orderly_core::domain::quotation::{
    Quotation, QuotationDraft, QuotationId, QuotationItem, QuotationItemChange, QuotationItemId,
    QuotationPatch,
};
use orderly_core::errors::WorkflowError;
use orderly_core::{money, numbering};

use super::{
    activity_log, customer, parse_decimal, parse_timestamp, parse_u32, product, RepositoryError,
};
use crate::{begin_immediate, DbPool};

#[async_trait::async_trait]
pub trait QuotationRepository: Send + Sync {
    async fn create(
        &self,
        draft: QuotationDraft,
        actor: &Actor,
    ) -> Result<Quotation, WorkflowError>;

    async fn update(
        &self,
        id: &QuotationId,
        patch: QuotationPatch,
        actor: &Actor,
    ) -> Result<Quotation, WorkflowError>;

    async fn approve(&self, id: &QuotationId, actor: &Actor) -> Result<Quotation, WorkflowError>;

    async fn move_to_sales(
        &self,
        id: &QuotationId,
        actor: &Actor,
    ) -> Result<Quotation, WorkflowError>;

    async fn move_to_invoice(
        &self,
        id: &QuotationId,
        actor: &Actor,
    ) -> Result<Quotation, WorkflowError>;

    async fn delete_item(
        &self,
        item_id: &QuotationItemId,
        actor: &Actor,
    ) -> Result<Quotation, WorkflowError>;

    async fn soft_delete(&self, id: &QuotationId, actor: &Actor) -> Result<(), WorkflowError>;

    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, WorkflowError>;

    async fn list_active(&self) -> Result<Vec<Quotation>, WorkflowError>;

    /// Approved quotations that have not yet been billed.
    async fn list_billable(&self) -> Result<Vec<Quotation>, WorkflowError>;
}

pub struct SqlQuotationRepository {
    pool: DbPool,
}

impl SqlQuotationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl QuotationRepository for SqlQuotationRepository {
    async fn create(
        &self,
        draft: QuotationDraft,
        actor: &Actor,
    ) -> Result<Quotation, WorkflowError> {
        if draft.items.is_empty() {
            return Err(WorkflowError::validation("Quotation requires at least one item"));
        }

        // Immediate transaction: the sequence number derives from a count
        // read inside it, so concurrent creators serialize.
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let customer = customer::fetch_active_customer(&mut tx, &draft.customer_id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("customer", &draft.customer_id.0))?;

        let mut items: Vec<QuotationItem> = Vec::with_capacity(draft.items.len());
        for line in &draft.items {
            if line.quantity == 0 {
                return Err(WorkflowError::validation("Quantity must be positive"));
            }
            if items.iter().any(|item| item.product_id == line.product_id) {
                return Err(WorkflowError::conflict("Duplicate product in quotation items"));
            }

            let product = product::fetch_active_product(&mut tx, &line.product_id.0)
                .await?
                .ok_or_else(|| WorkflowError::not_found("product", &line.product_id.0))?;

            let now = Utc::now();
            items.push(QuotationItem {
                id: QuotationItemId(format!("qitem-{}", sqlx::types::Uuid::new_v4())),
                product_id: line.product_id.clone(),
                product_name: product.name,
                quantity: line.quantity,
                unit_price: product.price,
                total: money::line_total(line.quantity, product.price),
                deleted: false,
                created_at: now,
                updated_at: now,
            });
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quotation")
            .fetch_one(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        let sequence = parse_u32("quotation count", count)? + 1;

        let now = Utc::now();
        let mut quotation = Quotation {
            id: QuotationId(format!("quot-{}", sqlx::types::Uuid::new_v4())),
            number: numbering::quotation_number(now, sequence),
            customer_id: customer.id,
            description: draft.description,
            notes: draft.notes,
            total_items_amount: Default::default(),
            gst_amount: Default::default(),
            total_amount: Default::default(),
            approved: false,
            moved_to_sales: false,
            moved_to_invoice: false,
            deleted: false,
            created_at: now,
            updated_at: now,
            items,
        };
        quotation.recompute_totals();

        insert_quotation_row(&mut tx, &quotation).await?;
        for item in &quotation.items {
            insert_item_row(&mut tx, &quotation.id.0, item).await?;
        }

        let event =
            ActivityEvent::new(actor, format!("Quotation '{}' created", quotation.number));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(quotation)
    }

    async fn update(
        &self,
        id: &QuotationId,
        patch: QuotationPatch,
        actor: &Actor,
    ) -> Result<Quotation, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut quotation = fetch_quotation(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("quotation", &id.0))?;
        quotation.ensure_editable()?;

        if let Some(customer_id) = patch.customer_id {
            let customer = customer::fetch_active_customer(&mut tx, &customer_id.0)
                .await?
                .ok_or_else(|| WorkflowError::not_found("customer", &customer_id.0))?;
            quotation.customer_id = customer.id;
        }
        if let Some(description) = patch.description {
            quotation.description = Some(description);
        }
        if let Some(notes) = patch.notes {
            quotation.notes = Some(notes);
        }

        for change in patch.items {
            match change {
                QuotationItemChange::Add(line) => {
                    if line.quantity == 0 {
                        return Err(WorkflowError::validation("Quantity must be positive"));
                    }
                    if quotation.has_live_product(&line.product_id) {
                        return Err(WorkflowError::conflict(
                            "Product already quoted on this quotation",
                        ));
                    }

                    let product = product::fetch_active_product(&mut tx, &line.product_id.0)
                        .await?
                        .ok_or_else(|| {
                            WorkflowError::not_found("product", &line.product_id.0)
                        })?;

                    let now = Utc::now();
                    let item = QuotationItem {
                        id: QuotationItemId(format!("qitem-{}", sqlx::types::Uuid::new_v4())),
                        product_id: line.product_id.clone(),
                        product_name: product.name,
                        quantity: line.quantity,
                        unit_price: product.price,
                        total: money::line_total(line.quantity, product.price),
                        deleted: false,
                        created_at: now,
                        updated_at: now,
                    };
                    insert_item_row(&mut tx, &quotation.id.0, &item).await?;
                    quotation.items.push(item);
                }
                QuotationItemChange::SetQuantity { item_id, quantity } => {
                    if quantity == 0 {
                        return Err(WorkflowError::validation("Quantity must be positive"));
                    }
                    let item = quotation
                        .items
                        .iter_mut()
                        .find(|item| item.id == item_id && !item.deleted)
                        .ok_or_else(|| WorkflowError::not_found("quotation item", &item_id.0))?;
                    item.quantity = quantity;
                    item.total = money::line_total(quantity, item.unit_price);
                    item.updated_at = Utc::now();
                    let updated = item.clone();
                    update_item_row(&mut tx, &updated).await?;
                }
                QuotationItemChange::Remove { item_id } => {
                    let item = quotation
                        .items
                        .iter_mut()
                        .find(|item| item.id == item_id && !item.deleted)
                        .ok_or_else(|| WorkflowError::not_found("quotation item", &item_id.0))?;
                    item.deleted = true;
                    item.updated_at = Utc::now();
                    let removed = item.clone();
                    update_item_row(&mut tx, &removed).await?;
                }
            }
        }

        quotation.recompute_totals();
        quotation.updated_at = Utc::now();
        update_quotation_row(&mut tx, &quotation).await?;

        let event =
            ActivityEvent::new(actor, format!("Quotation '{}' updated", quotation.number));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;

        quotation.items.retain(|item| !item.deleted);
        Ok(quotation)
    }

    async fn approve(&self, id: &QuotationId, actor: &Actor) -> Result<Quotation, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut quotation = fetch_quotation(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("quotation", &id.0))?;
        quotation.ensure_can_approve()?;

        quotation.approved = true;
        quotation.updated_at = Utc::now();
        update_quotation_row(&mut tx, &quotation).await?;

        let event =
            ActivityEvent::new(actor, format!("Quotation '{}' approved", quotation.number));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(quotation)
    }

    async fn move_to_sales(
        &self,
        id: &QuotationId,
        actor: &Actor,
    ) -> Result<Quotation, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut quotation = fetch_quotation(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("quotation", &id.0))?;
        quotation.ensure_can_move_to_sales()?;

        quotation.moved_to_sales = true;
        quotation.updated_at = Utc::now();
        update_quotation_row(&mut tx, &quotation).await?;

        let event = ActivityEvent::new(
            actor,
            format!("Quotation '{}' moved to sales order", quotation.number),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(quotation)
    }

    async fn move_to_invoice(
        &self,
        id: &QuotationId,
        actor: &Actor,
    ) -> Result<Quotation, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut quotation = fetch_quotation(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("quotation", &id.0))?;
        quotation.ensure_can_move_to_invoice()?;

        quotation.moved_to_invoice = true;
        quotation.updated_at = Utc::now();
        update_quotation_row(&mut tx, &quotation).await?;

        let event = ActivityEvent::new(
            actor,
            format!("Quotation '{}' moved to invoice", quotation.number),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(quotation)
    }

    async fn delete_item(
        &self,
        item_id: &QuotationItemId,
        actor: &Actor,
    ) -> Result<Quotation, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let quotation_id: Option<String> =
            sqlx::query_scalar("SELECT quotation_id FROM quotation_item WHERE id = ? AND deleted = 0")
                .bind(&item_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(RepositoryError::from)?;
        let quotation_id = quotation_id
            .ok_or_else(|| WorkflowError::not_found("quotation item", &item_id.0))?;

        let mut quotation = fetch_quotation(&mut tx, &quotation_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("quotation", &quotation_id))?;
        quotation.ensure_item_removable()?;

        let item = quotation
            .items
            .iter_mut()
            .find(|item| item.id == *item_id)
            .ok_or_else(|| WorkflowError::not_found("quotation item", &item_id.0))?;
        item.deleted = true;
        item.updated_at = Utc::now();
        let removed = item.clone();
        update_item_row(&mut tx, &removed).await?;

        quotation.recompute_totals();
        quotation.updated_at = Utc::now();
        update_quotation_row(&mut tx, &quotation).await?;

        let event = ActivityEvent::new(
            actor,
            format!("Item '{}' removed from quotation '{}'", removed.product_name, quotation.number),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;

        quotation.items.retain(|item| !item.deleted);
        Ok(quotation)
    }

    async fn soft_delete(&self, id: &QuotationId, actor: &Actor) -> Result<(), WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut quotation = fetch_quotation(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("quotation", &id.0))?;
        quotation.ensure_can_soft_delete()?;

        quotation.deleted = true;
        quotation.updated_at = Utc::now();
        update_quotation_row(&mut tx, &quotation).await?;

        let event =
            ActivityEvent::new(actor, format!("Quotation '{}' deleted", quotation.number));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_quotation(&mut conn, &id.0).await?)
    }

    async fn list_active(&self) -> Result<Vec<Quotation>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                number,
                customer_id,
                description,
                notes,
                CAST(total_items_amount AS TEXT) AS total_items_amount,
                CAST(gst_amount AS TEXT) AS gst_amount,
                CAST(total_amount AS TEXT) AS total_amount,
                approved,
                moved_to_sales,
                moved_to_invoice,
                deleted,
                created_at,
                updated_at
             FROM quotation
             WHERE deleted = 0
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let mut quotations = Vec::with_capacity(rows.len());
        for row in rows {
            let mut quotation = quotation_from_row(row)?;
            quotation.items = fetch_live_items(&mut conn, &quotation.id.0).await?;
            quotations.push(quotation);
        }
        Ok(quotations)
    }

    async fn list_billable(&self) -> Result<Vec<Quotation>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                number,
                customer_id,
                description,
                notes,
                CAST(total_items_amount AS TEXT) AS total_items_amount,
                CAST(gst_amount AS TEXT) AS gst_amount,
                CAST(total_amount AS TEXT) AS total_amount,
                approved,
                moved_to_sales,
                moved_to_invoice,
                deleted,
                created_at,
                updated_at
             FROM quotation
             WHERE deleted = 0 AND approved = 1 AND moved_to_invoice = 0
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let mut quotations = Vec::with_capacity(rows.len());
        for row in rows {
            let mut quotation = quotation_from_row(row)?;
            quotation.items = fetch_live_items(&mut conn, &quotation.id.0).await?;
            quotations.push(quotation);
        }
        Ok(quotations)
    }
}

pub(crate) async fn fetch_quotation(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Quotation>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            number,
            customer_id,
            description,
            notes,
            CAST(total_items_amount AS TEXT) AS total_items_amount,
            CAST(gst_amount AS TEXT) AS gst_amount,
            CAST(total_amount AS TEXT) AS total_amount,
            approved,
            moved_to_sales,
            moved_to_invoice,
            deleted,
            created_at,
            updated_at
         FROM quotation
         WHERE id = ? AND deleted = 0",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut quotation = quotation_from_row(row)?;
    quotation.items = fetch_live_items(conn, &quotation.id.0).await?;
    Ok(Some(quotation))
}

async fn fetch_live_items(
    conn: &mut SqliteConnection,
    quotation_id: &str,
) -> Result<Vec<QuotationItem>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT
            id,
            product_id,
            product_name,
            quantity,
            CAST(unit_price AS TEXT) AS unit_price,
            CAST(total AS TEXT) AS total,
            deleted,
            created_at,
            updated_at
         FROM quotation_item
         WHERE quotation_id = ? AND deleted = 0
         ORDER BY created_at ASC, id ASC",
    )
    .bind(quotation_id)
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(item_from_row).collect()
}

async fn insert_quotation_row(
    conn: &mut SqliteConnection,
    quotation: &Quotation,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO quotation (
            id,
            number,
            customer_id,
            description,
            notes,
            total_items_amount,
            gst_amount,
            total_amount,
            approved,
            moved_to_sales,
            moved_to_invoice,
            deleted,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&quotation.id.0)
    .bind(&quotation.number)
    .bind(&quotation.customer_id.0)
    .bind(quotation.description.as_deref())
    .bind(quotation.notes.as_deref())
    .bind(quotation.total_items_amount.to_string())
    .bind(quotation.gst_amount.to_string())
    .bind(quotation.total_amount.to_string())
    .bind(quotation.approved)
    .bind(quotation.moved_to_sales)
    .bind(quotation.moved_to_invoice)
    .bind(quotation.deleted)
    .bind(quotation.created_at.to_rfc3339())
    .bind(quotation.updated_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

async fn update_quotation_row(
    conn: &mut SqliteConnection,
    quotation: &Quotation,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE quotation SET
            customer_id = ?,
            description = ?,
            notes = ?,
            total_items_amount = ?,
            gst_amount = ?,
            total_amount = ?,
            approved = ?,
            moved_to_sales = ?,
            moved_to_invoice = ?,
            deleted = ?,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(&quotation.customer_id.0)
    .bind(quotation.description.as_deref())
    .bind(quotation.notes.as_deref())
    .bind(quotation.total_items_amount.to_string())
    .bind(quotation.gst_amount.to_string())
    .bind(quotation.total_amount.to_string())
    .bind(quotation.approved)
    .bind(quotation.moved_to_sales)
    .bind(quotation.moved_to_invoice)
    .bind(quotation.deleted)
    .bind(quotation.updated_at.to_rfc3339())
    .bind(&quotation.id.0)
    .execute(conn)
    .await?;

    Ok(())
}

async fn insert_item_row(
    conn: &mut SqliteConnection,
    quotation_id: &str,
    item: &QuotationItem,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO quotation_item (
            id,
            quotation_id,
            product_id,
            product_name,
            quantity,
            unit_price,
            total,
            deleted,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&item.id.0)
    .bind(quotation_id)
    .bind(&item.product_id.0)
    .bind(&item.product_name)
    .bind(i64::from(item.quantity))
    .bind(item.unit_price.to_string())
    .bind(item.total.to_string())
    .bind(item.deleted)
    .bind(item.created_at.to_rfc3339())
    .bind(item.updated_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

async fn update_item_row(
    conn: &mut SqliteConnection,
    item: &QuotationItem,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE quotation_item SET
            quantity = ?,
            total = ?,
            deleted = ?,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(i64::from(item.quantity))
    .bind(item.total.to_string())
    .bind(item.deleted)
    .bind(item.updated_at.to_rfc3339())
    .bind(&item.id.0)
    .execute(conn)
    .await?;

    Ok(())
}

fn quotation_from_row(row: SqliteRow) -> Result<Quotation, RepositoryError> {
    Ok(Quotation {
        id: QuotationId(row.try_get("id")?),
        number: row.try_get("number")?,
        customer_id: CustomerId(row.try_get("customer_id")?),
        description: row.try_get("description")?,
        notes: row.try_get("notes")?,
        total_items_amount: parse_decimal("total_items_amount", row.try_get("total_items_amount")?)?,
        gst_amount: parse_decimal("gst_amount", row.try_get("gst_amount")?)?,
        total_amount: parse_decimal("total_amount", row.try_get("total_amount")?)?,
        approved: row.try_get("approved")?,
        moved_to_sales: row.try_get("moved_to_sales")?,
        moved_to_invoice: row.try_get("moved_to_invoice")?,
        deleted: row.try_get("deleted")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        items: Vec::new(),
    })
}

fn item_from_row(row: SqliteRow) -> Result<QuotationItem, RepositoryError> {
    Ok(QuotationItem {
        id: QuotationItemId(row.try_get("id")?),
        product_id: ProductId(row.try_get("product_id")?),
        product_name: row.try_get("product_name")?,
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        total: parse_decimal("total", row.try_get("total")?)?,
        deleted: row.try_get("deleted")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
