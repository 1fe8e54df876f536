use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use orderly_core::activity::ActivityEvent;
use orderly_core::domain::actor::Actor;
use orderly_core::domain::customer::CustomerId;
use orderly_core::domain::invoice::{
    DiscountInstruction, FinalBill, Invoice, InvoiceId, InvoiceStatus,
};
use orderly_core::domain::quotation::QuotationId;
use orderly_core::domain::sales_order::SalesOrderId;
use orderly_core::errors::WorkflowError;
use orderly_core::{money, numbering};

use super::{
    activity_log, discount, is_unique_violation, parse_decimal, parse_timestamp, quotation,
    sales_order, RepositoryError,
};
use crate::{begin_immediate, DbPool};

#[async_trait::async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn create_from_quotation(
        &self,
        quotation_id: &QuotationId,
        actor: &Actor,
    ) -> Result<Invoice, WorkflowError>;

    async fn create_from_sales_order(
        &self,
        sales_order_id: &SalesOrderId,
        actor: &Actor,
    ) -> Result<Invoice, WorkflowError>;

    /// One-time discount on an unpaid invoice, either a flat administrative
    /// amount or a coupon code resolved against the discount registry.
    async fn apply_discount(
        &self,
        id: &InvoiceId,
        instruction: DiscountInstruction,
        note: Option<&str>,
        actor: &Actor,
    ) -> Result<Invoice, WorkflowError>;

    /// Admin approval, optionally folding a discount into the same write.
    async fn approve(
        &self,
        id: &InvoiceId,
        discount: Option<DiscountInstruction>,
        actor: &Actor,
    ) -> Result<Invoice, WorkflowError>;

    async fn cancel(&self, id: &InvoiceId, actor: &Actor) -> Result<Invoice, WorkflowError>;

    async fn final_bill(&self, id: &InvoiceId) -> Result<FinalBill, WorkflowError>;

    async fn find_by_id(&self, id: &InvoiceId) -> Result<Option<Invoice>, WorkflowError>;

    async fn list_active(&self) -> Result<Vec<Invoice>, WorkflowError>;
}

pub struct SqlInvoiceRepository {
    pool: DbPool,
}

impl SqlInvoiceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InvoiceRepository for SqlInvoiceRepository {
    async fn create_from_quotation(
        &self,
        quotation_id: &QuotationId,
        actor: &Actor,
    ) -> Result<Invoice, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let quotation = quotation::fetch_quotation(&mut tx, &quotation_id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("quotation", &quotation_id.0))?;

        if already_billed(&mut tx, Some(&quotation.id.0), None).await? {
            return Err(WorkflowError::conflict("Invoice already exists for this quotation"));
        }

        let mut invoice = new_invoice(
            quotation.customer_id.clone(),
            Some(quotation.id.clone()),
            None,
            quotation.total_amount,
        );
        insert_with_number_retry(&mut tx, &mut invoice).await?;

        let event = ActivityEvent::new(
            actor,
            format!("Invoice '{}' created from quotation '{}'", invoice.number, quotation.number),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(invoice)
    }

    async fn create_from_sales_order(
        &self,
        sales_order_id: &SalesOrderId,
        actor: &Actor,
    ) -> Result<Invoice, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let order = sales_order::fetch_sales_order(&mut tx, &sales_order_id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("sales order", &sales_order_id.0))?;

        // An order-sourced invoice keeps both links, so either path finding a
        // live invoice for the underlying quotation blocks a second billing.
        if already_billed(&mut tx, Some(&order.quotation_id.0), Some(&order.id.0)).await? {
            return Err(WorkflowError::conflict("Invoice already exists for this sales order"));
        }

        let mut invoice = new_invoice(
            order.customer_id.clone(),
            Some(order.quotation_id.clone()),
            Some(order.id.clone()),
            order.billable_total(),
        );
        insert_with_number_retry(&mut tx, &mut invoice).await?;

        let event = ActivityEvent::new(
            actor,
            format!("Invoice '{}' created from sales order '{}'", invoice.number, order.id.0),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(invoice)
    }

    async fn apply_discount(
        &self,
        id: &InvoiceId,
        instruction: DiscountInstruction,
        note: Option<&str>,
        actor: &Actor,
    ) -> Result<Invoice, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut invoice = fetch_invoice(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("invoice", &id.0))?;
        invoice.ensure_can_discount()?;

        let amount = resolve_discount_amount(&mut tx, &invoice, instruction).await?;
        invoice.validate_discount_amount(amount)?;

        invoice.discounted_amount = amount;
        invoice.recompute_settlement();
        invoice.updated_at = Utc::now();
        update_invoice_row(&mut tx, &invoice).await?;

        let mut action = format!("Discount of {amount} applied to invoice '{}'", invoice.number);
        if let Some(note) = note {
            action.push_str(" (");
            action.push_str(note);
            action.push(')');
        }
        // Coupled: a failed audit write fails the discount.
        activity_log::append(&mut *tx, &ActivityEvent::new(actor, action)).await?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(invoice)
    }

    async fn approve(
        &self,
        id: &InvoiceId,
        discount: Option<DiscountInstruction>,
        actor: &Actor,
    ) -> Result<Invoice, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut invoice = fetch_invoice(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("invoice", &id.0))?;
        invoice.ensure_can_approve()?;

        let folded = match discount {
            Some(instruction) => {
                invoice.ensure_can_discount()?;
                let amount = resolve_discount_amount(&mut tx, &invoice, instruction).await?;
                invoice.validate_discount_amount(amount)?;
                invoice.discounted_amount = amount;
                invoice.recompute_settlement();
                Some(amount)
            }
            None => None,
        };

        invoice.approved_by_admin = true;
        invoice.status = InvoiceStatus::Approved;
        invoice.updated_at = Utc::now();
        update_invoice_row(&mut tx, &invoice).await?;

        let action = match folded {
            Some(amount) => {
                format!("Invoice '{}' approved with discount of {amount}", invoice.number)
            }
            None => format!("Invoice '{}' approved", invoice.number),
        };
        activity_log::append_best_effort(&mut *tx, &ActivityEvent::new(actor, action)).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(invoice)
    }

    async fn cancel(&self, id: &InvoiceId, actor: &Actor) -> Result<Invoice, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut invoice = fetch_invoice(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("invoice", &id.0))?;
        invoice.ensure_can_cancel()?;

        invoice.status = InvoiceStatus::Cancelled;
        invoice.updated_at = Utc::now();
        update_invoice_row(&mut tx, &invoice).await?;

        let event = ActivityEvent::new(actor, format!("Invoice '{}' cancelled", invoice.number));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(invoice)
    }

    async fn final_bill(&self, id: &InvoiceId) -> Result<FinalBill, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let invoice = fetch_invoice(&mut conn, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("invoice", &id.0))?;
        Ok(invoice.final_bill())
    }

    async fn find_by_id(&self, id: &InvoiceId) -> Result<Option<Invoice>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_invoice(&mut conn, &id.0).await?)
    }

    async fn list_active(&self) -> Result<Vec<Invoice>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                number,
                customer_id,
                quotation_id,
                sales_order_id,
                CAST(total_amount AS TEXT) AS total_amount,
                CAST(discounted_amount AS TEXT) AS discounted_amount,
                CAST(total_paid AS TEXT) AS total_paid,
                CAST(balance_due AS TEXT) AS balance_due,
                status,
                approved_by_admin,
                loyalty_claimed,
                deleted,
                created_at,
                updated_at
             FROM invoice
             WHERE deleted = 0
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(invoice_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WorkflowError::from)
    }
}

fn new_invoice(
    customer_id: CustomerId,
    quotation_id: Option<QuotationId>,
    sales_order_id: Option<SalesOrderId>,
    total_amount: Decimal,
) -> Invoice {
    let now = Utc::now();
    Invoice {
        id: InvoiceId(format!("inv-{}", sqlx::types::Uuid::new_v4())),
        number: String::new(),
        customer_id,
        quotation_id,
        sales_order_id,
        total_amount,
        discounted_amount: Decimal::ZERO,
        total_paid: Decimal::ZERO,
        balance_due: total_amount,
        status: InvoiceStatus::Pending,
        approved_by_admin: false,
        loyalty_claimed: false,
        deleted: false,
        created_at: now,
        updated_at: now,
    }
}

/// Inserts the invoice, regenerating the timestamp-plus-random number on a
/// uniqueness collision, up to the configured attempt cap.
async fn insert_with_number_retry(
    conn: &mut SqliteConnection,
    invoice: &mut Invoice,
) -> Result<(), WorkflowError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        invoice.number = numbering::invoice_number(Utc::now());
        match insert_invoice_row(conn, invoice).await {
            Ok(()) => return Ok(()),
            Err(RepositoryError::Database(error)) if is_unique_violation(&error) => {
                if attempts >= numbering::INVOICE_NUMBER_ATTEMPTS {
                    return Err(WorkflowError::RetryExhausted {
                        operation: "invoice number generation",
                        attempts,
                    });
                }
                tracing::debug!(attempts, "invoice number collided, regenerating");
            }
            Err(error) => return Err(error.into()),
        }
    }
}

async fn resolve_discount_amount(
    conn: &mut SqliteConnection,
    invoice: &Invoice,
    instruction: DiscountInstruction,
) -> Result<Decimal, WorkflowError> {
    match instruction {
        DiscountInstruction::Flat(amount) => Ok(money::round2(amount)),
        DiscountInstruction::Code(code) => {
            let discount = discount::fetch_live_discount_by_code(conn, &code)
                .await?
                .ok_or_else(|| WorkflowError::not_found("discount", &code))?;
            discount.ensure_redeemable(Utc::now().date_naive())?;
            discount::record_redemption(conn, &discount.id).await?;
            Ok(discount.amount_off(invoice.total_amount))
        }
    }
}

async fn already_billed(
    conn: &mut SqliteConnection,
    quotation_id: Option<&str>,
    sales_order_id: Option<&str>,
) -> Result<bool, RepositoryError> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM invoice
         WHERE deleted = 0
           AND (quotation_id = COALESCE(?, '') OR sales_order_id = COALESCE(?, ''))",
    )
    .bind(quotation_id)
    .bind(sales_order_id)
    .fetch_optional(conn)
    .await?;
    Ok(existing.is_some())
}

pub(crate) async fn fetch_invoice(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Invoice>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            number,
            customer_id,
            quotation_id,
            sales_order_id,
            CAST(total_amount AS TEXT) AS total_amount,
            CAST(discounted_amount AS TEXT) AS discounted_amount,
            CAST(total_paid AS TEXT) AS total_paid,
            CAST(balance_due AS TEXT) AS balance_due,
            status,
            approved_by_admin,
            loyalty_claimed,
            deleted,
            created_at,
            updated_at
         FROM invoice
         WHERE id = ? AND deleted = 0",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.map(invoice_from_row).transpose()
}

async fn insert_invoice_row(
    conn: &mut SqliteConnection,
    invoice: &Invoice,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO invoice (
            id,
            number,
            customer_id,
            quotation_id,
            sales_order_id,
            total_amount,
            discounted_amount,
            total_paid,
            balance_due,
            status,
            approved_by_admin,
            loyalty_claimed,
            deleted,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&invoice.id.0)
    .bind(&invoice.number)
    .bind(&invoice.customer_id.0)
    .bind(invoice.quotation_id.as_ref().map(|id| id.0.as_str()))
    .bind(invoice.sales_order_id.as_ref().map(|id| id.0.as_str()))
    .bind(invoice.total_amount.to_string())
    .bind(invoice.discounted_amount.to_string())
    .bind(invoice.total_paid.to_string())
    .bind(invoice.balance_due.to_string())
    .bind(invoice.status.as_str())
    .bind(invoice.approved_by_admin)
    .bind(invoice.loyalty_claimed)
    .bind(invoice.deleted)
    .bind(invoice.created_at.to_rfc3339())
    .bind(invoice.updated_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

pub(crate) async fn update_invoice_row(
    conn: &mut SqliteConnection,
    invoice: &Invoice,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE invoice SET
            discounted_amount = ?,
            total_paid = ?,
            balance_due = ?,
            status = ?,
            approved_by_admin = ?,
            loyalty_claimed = ?,
            deleted = ?,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(invoice.discounted_amount.to_string())
    .bind(invoice.total_paid.to_string())
    .bind(invoice.balance_due.to_string())
    .bind(invoice.status.as_str())
    .bind(invoice.approved_by_admin)
    .bind(invoice.loyalty_claimed)
    .bind(invoice.deleted)
    .bind(invoice.updated_at.to_rfc3339())
    .bind(&invoice.id.0)
    .execute(conn)
    .await?;

    Ok(())
}

fn invoice_from_row(row: SqliteRow) -> Result<Invoice, RepositoryError> {
    let raw_status = row.try_get::<String, _>("status")?;
    let status = InvoiceStatus::parse(&raw_status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown invoice status `{raw_status}`")))?;

    Ok(Invoice {
        id: InvoiceId(row.try_get("id")?),
        number: row.try_get("number")?,
        customer_id: CustomerId(row.try_get("customer_id")?),
        quotation_id: row.try_get::<Option<String>, _>("quotation_id")?.map(QuotationId),
        sales_order_id: row.try_get::<Option<String>, _>("sales_order_id")?.map(SalesOrderId),
        total_amount: parse_decimal("total_amount", row.try_get("total_amount")?)?,
        discounted_amount: parse_decimal("discounted_amount", row.try_get("discounted_amount")?)?,
        total_paid: parse_decimal("total_paid", row.try_get("total_paid")?)?,
        balance_due: parse_decimal("balance_due", row.try_get("balance_due")?)?,
        status,
        approved_by_admin: row.try_get("approved_by_admin")?,
        loyalty_claimed: row.try_get("loyalty_claimed")?,
        deleted: row.try_get("deleted")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
