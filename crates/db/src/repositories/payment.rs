use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use orderly_core::activity::ActivityEvent;
use orderly_core::domain::actor::Actor;
use orderly_core::domain::customer::CustomerId;
use orderly_core::domain::invoice::{Invoice, InvoiceId};
use orderly_core::domain::payment::{Payment, PaymentId};
use orderly_core::errors::WorkflowError;
use orderly_core::money;

use super::{activity_log, invoice, parse_decimal, parse_timestamp, RepositoryError};
use crate::{begin_immediate, DbPool};

/// A settled payment together with the invoice state it produced.
#[derive(Clone, Debug, PartialEq)]
pub struct PaymentOutcome {
    pub payment: Payment,
    pub invoice: Invoice,
}

#[async_trait::async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Validates and applies a payment under the invoice row lock. Two
    /// concurrent payments serialize; the later one re-reads the settled
    /// balance and fails validation if it no longer fits.
    async fn add_payment(
        &self,
        invoice_id: &InvoiceId,
        amount: Decimal,
        method: Option<String>,
        actor: &Actor,
    ) -> Result<PaymentOutcome, WorkflowError>;

    async fn list_for_invoice(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<Payment>, WorkflowError>;
}

pub struct SqlPaymentRepository {
    pool: DbPool,
}

impl SqlPaymentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PaymentRepository for SqlPaymentRepository {
    async fn add_payment(
        &self,
        invoice_id: &InvoiceId,
        amount: Decimal,
        method: Option<String>,
        actor: &Actor,
    ) -> Result<PaymentOutcome, WorkflowError> {
        let amount = money::round2(amount);

        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut invoice = invoice::fetch_invoice(&mut tx, &invoice_id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("invoice", &invoice_id.0))?;
        invoice.ensure_payment_allowed(amount)?;

        let payment = Payment::new(invoice.id.clone(), invoice.customer_id.clone(), amount, method);
        insert_payment_row(&mut tx, &payment).await?;

        invoice.total_paid = money::round2(invoice.total_paid + amount);
        invoice.recompute_settlement();
        invoice.updated_at = Utc::now();
        invoice::update_invoice_row(&mut tx, &invoice).await?;

        let event = ActivityEvent::new(
            actor,
            format!("Payment of {amount} recorded against invoice '{}'", invoice.number),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(PaymentOutcome { payment, invoice })
    }

    async fn list_for_invoice(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<Payment>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                invoice_id,
                customer_id,
                CAST(amount AS TEXT) AS amount,
                method,
                created_at
             FROM payment
             WHERE invoice_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&invoice_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(payment_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WorkflowError::from)
    }
}

async fn insert_payment_row(
    conn: &mut SqliteConnection,
    payment: &Payment,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO payment (
            id,
            invoice_id,
            customer_id,
            amount,
            method,
            created_at
         ) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&payment.id.0)
    .bind(&payment.invoice_id.0)
    .bind(&payment.customer_id.0)
    .bind(payment.amount.to_string())
    .bind(payment.method.as_deref())
    .bind(payment.created_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

fn payment_from_row(row: SqliteRow) -> Result<Payment, RepositoryError> {
    Ok(Payment {
        id: PaymentId(row.try_get("id")?),
        invoice_id: InvoiceId(row.try_get("invoice_id")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        method: row.try_get("method")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
