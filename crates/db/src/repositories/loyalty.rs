use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use orderly_core::activity::ActivityEvent;
use orderly_core::domain::actor::Actor;
use orderly_core::domain::customer::CustomerId;
use orderly_core::domain::invoice::{InvoiceId, InvoiceStatus};
use orderly_core::domain::loyalty::{LoyaltyToken, LoyaltyTokenId};
use orderly_core::errors::WorkflowError;
use orderly_core::money;

use super::{activity_log, invoice, parse_timestamp, RepositoryError};
use crate::{begin_immediate, DbPool};

#[async_trait::async_trait]
pub trait LoyaltyRepository: Send + Sync {
    /// Awards tokens for a fully paid invoice, exactly once. Returns
    /// `Ok(None)` without error when the invoice is missing, already claimed,
    /// or not yet paid, so callers can fire it as a settlement follow-up
    /// without caring about the state it finds.
    async fn award_for_invoice(
        &self,
        invoice_id: &InvoiceId,
        rate_per_thousand: u32,
        actor: &Actor,
    ) -> Result<Option<LoyaltyToken>, WorkflowError>;

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<LoyaltyToken>, WorkflowError>;
}

pub struct SqlLoyaltyRepository {
    pool: DbPool,
}

impl SqlLoyaltyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LoyaltyRepository for SqlLoyaltyRepository {
    async fn award_for_invoice(
        &self,
        invoice_id: &InvoiceId,
        rate_per_thousand: u32,
        actor: &Actor,
    ) -> Result<Option<LoyaltyToken>, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let Some(mut invoice) = invoice::fetch_invoice(&mut tx, &invoice_id.0).await? else {
            return Ok(None);
        };
        if invoice.loyalty_claimed || invoice.status != InvoiceStatus::Paid {
            return Ok(None);
        }

        let tokens = money::loyalty_tokens(invoice.total_amount, rate_per_thousand);
        let token = if tokens > 0 {
            let token =
                LoyaltyToken::new(invoice.customer_id.clone(), invoice.id.clone(), tokens);
            insert_token_row(&mut tx, &token).await?;
            Some(token)
        } else {
            None
        };

        // Claimed even at zero tokens: the invoice has been evaluated.
        invoice.loyalty_claimed = true;
        invoice.updated_at = Utc::now();
        invoice::update_invoice_row(&mut tx, &invoice).await?;

        if let Some(token) = &token {
            let event = ActivityEvent::new(
                actor,
                format!("{} loyalty tokens awarded for invoice '{}'", token.tokens, invoice.number),
            );
            activity_log::append_best_effort(&mut *tx, &event).await;
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(token)
    }

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<LoyaltyToken>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                customer_id,
                invoice_id,
                tokens,
                created_at
             FROM loyalty_token
             WHERE customer_id = ?
             ORDER BY created_at DESC, id DESC",
        )
        .bind(&customer_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(token_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WorkflowError::from)
    }
}

async fn insert_token_row(
    conn: &mut SqliteConnection,
    token: &LoyaltyToken,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO loyalty_token (
            id,
            customer_id,
            invoice_id,
            tokens,
            created_at
         ) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&token.id.0)
    .bind(&token.customer_id.0)
    .bind(&token.invoice_id.0)
    .bind(token.tokens)
    .bind(token.created_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

fn token_from_row(row: SqliteRow) -> Result<LoyaltyToken, RepositoryError> {
    Ok(LoyaltyToken {
        id: LoyaltyTokenId(row.try_get("id")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        invoice_id: InvoiceId(row.try_get("invoice_id")?),
        tokens: row.try_get("tokens")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use orderly_core::domain::actor::Actor;
    use orderly_core::domain::customer::Customer;
    use orderly_core::domain::invoice::{Invoice, InvoiceId};
    use orderly_core::domain::product::Product;
    use orderly_core::domain::quotation::{QuotationDraft, QuotationItemDraft};

    use super::{LoyaltyRepository, SqlLoyaltyRepository};
    use crate::repositories::{
        CustomerRepository, InvoiceRepository, PaymentRepository, ProductRepository,
        QuotationRepository, SqlCustomerRepository, SqlInvoiceRepository, SqlPaymentRepository,
        SqlProductRepository, SqlQuotationRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    #[tokio::test]
    async fn award_pays_once_per_settled_invoice() {
        let pool = setup_pool().await;
        let repo = SqlLoyaltyRepository::new(pool.clone());
        let actor = Actor::system();

        // 2000.00 line -> 2360.00 with GST -> two full thousands.
        let invoice = paid_invoice(&pool, Decimal::new(200000, 2)).await;

        let token = repo
            .award_for_invoice(&invoice.id, 3, &actor)
            .await
            .expect("award")
            .expect("tokens granted");
        assert_eq!(token.tokens, 6);
        assert_eq!(token.customer_id, invoice.customer_id);
        assert_eq!(token.invoice_id, invoice.id);

        let claimed = SqlInvoiceRepository::new(pool.clone())
            .find_by_id(&invoice.id)
            .await
            .expect("find invoice")
            .expect("invoice exists");
        assert!(claimed.loyalty_claimed);

        let repeat = repo.award_for_invoice(&invoice.id, 3, &actor).await.expect("repeat award");
        assert_eq!(repeat, None);

        let tokens = repo
            .list_for_customer(&invoice.customer_id)
            .await
            .expect("list tokens");
        assert_eq!(tokens, vec![token]);

        pool.close().await;
    }

    #[tokio::test]
    async fn award_noops_for_unpaid_or_missing_invoices() {
        let pool = setup_pool().await;
        let repo = SqlLoyaltyRepository::new(pool.clone());
        let invoices = SqlInvoiceRepository::new(pool.clone());
        let actor = Actor::system();

        let invoice = unpaid_invoice(&pool, Decimal::new(200000, 2)).await;
        let awarded = repo.award_for_invoice(&invoice.id, 3, &actor).await.expect("award");
        assert_eq!(awarded, None);

        let unevaluated = invoices
            .find_by_id(&invoice.id)
            .await
            .expect("find invoice")
            .expect("invoice exists");
        assert!(!unevaluated.loyalty_claimed);

        let missing = repo
            .award_for_invoice(&InvoiceId("inv-absent".to_owned()), 3, &actor)
            .await
            .expect("award for missing");
        assert_eq!(missing, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn zero_token_awards_still_claim_the_invoice() {
        let pool = setup_pool().await;
        let repo = SqlLoyaltyRepository::new(pool.clone());
        let actor = Actor::system();

        // 100.00 line -> 118.00 with GST -> no full thousand.
        let invoice = paid_invoice(&pool, Decimal::new(10000, 2)).await;

        let awarded = repo.award_for_invoice(&invoice.id, 5, &actor).await.expect("award");
        assert_eq!(awarded, None);

        let claimed = SqlInvoiceRepository::new(pool.clone())
            .find_by_id(&invoice.id)
            .await
            .expect("find invoice")
            .expect("invoice exists");
        assert!(claimed.loyalty_claimed);
        assert!(repo
            .list_for_customer(&invoice.customer_id)
            .await
            .expect("list tokens")
            .is_empty());

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn unpaid_invoice(pool: &DbPool, unit_price: Decimal) -> Invoice {
        let actor = Actor::system();
        let customer = Customer::new("Acme Traders");
        SqlCustomerRepository::new(pool.clone())
            .save(customer.clone(), &actor)
            .await
            .expect("seed customer");

        let product = Product::new("Teak Cabinet", unit_price);
        SqlProductRepository::new(pool.clone())
            .save(product.clone(), &actor)
            .await
            .expect("seed product");

        let quotations = SqlQuotationRepository::new(pool.clone());
        let quotation = quotations
            .create(
                QuotationDraft {
                    customer_id: customer.id.clone(),
                    description: None,
                    notes: None,
                    items: vec![QuotationItemDraft { product_id: product.id.clone(), quantity: 1 }],
                },
                &actor,
            )
            .await
            .expect("seed quotation");
        quotations.approve(&quotation.id, &actor).await.expect("approve quotation");
        quotations.move_to_invoice(&quotation.id, &actor).await.expect("move quotation");

        let invoices = SqlInvoiceRepository::new(pool.clone());
        let invoice = invoices
            .create_from_quotation(&quotation.id, &actor)
            .await
            .expect("seed invoice");
        invoices.approve(&invoice.id, None, &actor).await.expect("approve invoice")
    }

    async fn paid_invoice(pool: &DbPool, unit_price: Decimal) -> Invoice {
        let invoice = unpaid_invoice(pool, unit_price).await;
        SqlPaymentRepository::new(pool.clone())
            .add_payment(&invoice.id, invoice.balance_due, None, &Actor::system())
            .await
            .expect("settle invoice")
            .invoice
    }
}
