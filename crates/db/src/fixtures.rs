use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Canonical demo seeds and verification contract, one scenario per
/// order-to-cash stage.
const SEED_SCENARIOS: &[SeedScenarioContract] = &[
    SeedScenarioContract {
        scenario: "open_quotation",
        quotation_id: "quot-demo-draft",
        quotation_number: "QTN-20260810-0002",
        customer_id: "cust-demo-sharma",
        line_count: 2,
        approved: false,
        moved_to_sales: false,
        moved_to_invoice: false,
        sales_order_id: None,
        completion_steps: 0,
        invoice_id: None,
        invoice_status: None,
        balance_due: None,
        payment_count: 0,
        loyalty_token_id: None,
        description: "Two-line draft awaiting customer sign-off",
    },
    SeedScenarioContract {
        scenario: "order_in_production",
        quotation_id: "quot-demo-order",
        quotation_number: "QTN-20260811-0003",
        customer_id: "cust-demo-rao",
        line_count: 1,
        approved: true,
        moved_to_sales: true,
        moved_to_invoice: false,
        sales_order_id: Some("so-demo-order"),
        completion_steps: 2,
        invoice_id: None,
        invoice_status: None,
        balance_due: None,
        payment_count: 0,
        loyalty_token_id: None,
        description: "Approved quotation in the workshop as a sales order",
    },
    SeedScenarioContract {
        scenario: "invoice_collecting",
        quotation_id: "quot-demo-open",
        quotation_number: "QTN-20260812-0004",
        customer_id: "cust-demo-sharma",
        line_count: 1,
        approved: true,
        moved_to_sales: false,
        moved_to_invoice: true,
        sales_order_id: None,
        completion_steps: 0,
        invoice_id: Some("inv-demo-open"),
        invoice_status: Some("partially_paid"),
        balance_due: Some("2720.00"),
        payment_count: 1,
        loyalty_token_id: None,
        description: "Approved invoice with a partial payment outstanding",
    },
    SeedScenarioContract {
        scenario: "invoice_settled",
        quotation_id: "quot-demo-paid",
        quotation_number: "QTN-20260805-0001",
        customer_id: "cust-demo-rao",
        line_count: 1,
        approved: true,
        moved_to_sales: false,
        moved_to_invoice: true,
        sales_order_id: None,
        completion_steps: 0,
        invoice_id: Some("inv-demo-paid"),
        invoice_status: Some("paid"),
        balance_due: Some("0.00"),
        payment_count: 2,
        loyalty_token_id: Some("loy-demo-paid"),
        description: "Settled invoice with its loyalty award claimed",
    },
];

const SEED_CUSTOMER_IDS: &[&str] = &["cust-demo-sharma", "cust-demo-rao"];

const SEED_PRODUCT_IDS: &[&str] = &["prod-demo-chair", "prod-demo-table", "prod-demo-sofa"];

const SEED_QUOTATION_IDS: &[&str] =
    &["quot-demo-paid", "quot-demo-draft", "quot-demo-order", "quot-demo-open"];

const SEED_INVOICE_IDS: &[&str] = &["inv-demo-paid", "inv-demo-open"];

const SEED_ACTIVITY_IDS: &[&str] = &["act-demo-1", "act-demo-2", "act-demo-3", "act-demo-4"];

/// Demo dataset covering the four workflow stages.
///
/// Provides deterministic fixtures for:
/// 1. An open quotation
/// 2. A sales order in production
/// 3. An approved invoice collecting payments
/// 4. A settled invoice with its loyalty award claimed
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    /// SQL fixture content for the demo dataset.
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    /// Load the demo dataset into the database. Reloading is a no-op.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let scenarios_seeded = SEED_SCENARIOS
            .iter()
            .map(|scenario| ScenarioSeedInfo {
                scenario: scenario.scenario,
                quotation_id: scenario.quotation_id,
                description: scenario.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { scenarios_seeded })
    }

    /// Verify that seed data exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let quoted_customers = sql_array_from_ids(SEED_CUSTOMER_IDS);
        let active_customers: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM customer WHERE id IN {quoted_customers} AND active = 1"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("customers", active_customers == SEED_CUSTOMER_IDS.len() as i64));

        let quoted_products = sql_array_from_ids(SEED_PRODUCT_IDS);
        let live_products: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM product WHERE id IN {quoted_products} AND deleted = 0"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("products", live_products == SEED_PRODUCT_IDS.len() as i64));

        let supplier_exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM supplier WHERE id = 'sup-demo-malabar' AND deleted = 0)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("supplier", supplier_exists == 1));

        let discount_live: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM discount
             WHERE id = 'disc-demo-welcome' AND code = 'WELCOME10'
               AND status = 'active' AND deleted = 0)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("discount", discount_live == 1));

        for scenario in SEED_SCENARIOS {
            let quotation_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM quotation
                 WHERE id = ?1 AND number = ?2 AND customer_id = ?3
                   AND approved = ?4 AND moved_to_sales = ?5 AND moved_to_invoice = ?6
                   AND deleted = 0)",
            )
            .bind(scenario.quotation_id)
            .bind(scenario.quotation_number)
            .bind(scenario.customer_id)
            .bind(scenario.approved)
            .bind(scenario.moved_to_sales)
            .bind(scenario.moved_to_invoice)
            .fetch_one(pool)
            .await?;
            checks.push((scenario.quotation_id, quotation_ok == 1));

            let line_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM quotation_item WHERE quotation_id = ?1 AND deleted = 0",
            )
            .bind(scenario.quotation_id)
            .fetch_one(pool)
            .await?;
            checks.push((scenario.line_count_label(), line_count == scenario.line_count));

            if let Some(sales_order_id) = scenario.sales_order_id {
                let order_ok: i64 = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM sales_order
                     WHERE id = ?1 AND quotation_id = ?2
                       AND json_array_length(completion_status) = ?3)",
                )
                .bind(sales_order_id)
                .bind(scenario.quotation_id)
                .bind(scenario.completion_steps)
                .fetch_one(pool)
                .await?;
                checks.push((scenario.order_label(), order_ok == 1));
            }

            if let Some(invoice_id) = scenario.invoice_id {
                let invoice_ok: i64 = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM invoice
                     WHERE id = ?1 AND quotation_id = ?2 AND status = ?3
                       AND CAST(balance_due AS TEXT) = ?4 AND deleted = 0)",
                )
                .bind(invoice_id)
                .bind(scenario.quotation_id)
                .bind(scenario.invoice_status)
                .bind(scenario.balance_due)
                .fetch_one(pool)
                .await?;
                checks.push((scenario.invoice_label(), invoice_ok == 1));

                let payment_count: i64 =
                    sqlx::query_scalar("SELECT COUNT(1) FROM payment WHERE invoice_id = ?1")
                        .bind(invoice_id)
                        .fetch_one(pool)
                        .await?;
                checks.push((scenario.payment_label(), payment_count == scenario.payment_count));

                let token_count: i64 =
                    sqlx::query_scalar("SELECT COUNT(1) FROM loyalty_token WHERE invoice_id = ?1")
                        .bind(invoice_id)
                        .fetch_one(pool)
                        .await?;
                let token_expected = i64::from(scenario.loyalty_token_id.is_some());
                checks.push((scenario.loyalty_label(), token_count == token_expected));
            }
        }

        let receipt_ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM goods_receipt
             WHERE id = 'grn-demo-july' AND verified = 1 AND deleted = 0)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("goods-receipt", receipt_ok == 1));

        let receipt_items: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM goods_receipt_item WHERE receipt_id = 'grn-demo-july'",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("goods-receipt-items", receipt_items == 2));

        let transfer_pending: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM stock_transfer
             WHERE id = 'xfer-demo-floor' AND status = 'pending' AND deleted = 0)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("stock-transfer", transfer_pending == 1));

        let quoted_activities = sql_array_from_ids(SEED_ACTIVITY_IDS);
        let activity_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM activity_log WHERE id IN {quoted_activities}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("activity-trail", activity_count == SEED_ACTIVITY_IDS.len() as i64));

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove seeded fixtures from a test database.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_activities = sql_array_from_ids(SEED_ACTIVITY_IDS);
        let quoted_invoices = sql_array_from_ids(SEED_INVOICE_IDS);
        let quoted_quotations = sql_array_from_ids(SEED_QUOTATION_IDS);
        let quoted_products = sql_array_from_ids(SEED_PRODUCT_IDS);
        let quoted_customers = sql_array_from_ids(SEED_CUSTOMER_IDS);

        sqlx::query(&format!("DELETE FROM activity_log WHERE id IN {quoted_activities}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM loyalty_token WHERE invoice_id IN {quoted_invoices}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM payment WHERE invoice_id IN {quoted_invoices}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM invoice WHERE id IN {quoted_invoices}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sales_order WHERE id = 'so-demo-order'")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "DELETE FROM quotation_item WHERE quotation_id IN {quoted_quotations}"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DELETE FROM quotation WHERE id IN {quoted_quotations}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stock_transfer WHERE id = 'xfer-demo-floor'")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM goods_receipt_item WHERE receipt_id = 'grn-demo-july'")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM goods_receipt WHERE id = 'grn-demo-july'")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM discount WHERE id = 'disc-demo-welcome'")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM supplier WHERE id = 'sup-demo-malabar'")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM product WHERE id IN {quoted_products}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM customer WHERE id IN {quoted_customers}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedScenarioContract {
    scenario: &'static str,
    quotation_id: &'static str,
    quotation_number: &'static str,
    customer_id: &'static str,
    line_count: i64,
    approved: bool,
    moved_to_sales: bool,
    moved_to_invoice: bool,
    sales_order_id: Option<&'static str>,
    completion_steps: i64,
    invoice_id: Option<&'static str>,
    invoice_status: Option<&'static str>,
    balance_due: Option<&'static str>,
    payment_count: i64,
    loyalty_token_id: Option<&'static str>,
    description: &'static str,
}

impl SeedScenarioContract {
    fn line_count_label(&self) -> &'static str {
        match self.scenario {
            "open_quotation" => "quotation-draft-line-count",
            "order_in_production" => "quotation-order-line-count",
            "invoice_collecting" => "quotation-open-line-count",
            _ => "quotation-paid-line-count",
        }
    }

    fn order_label(&self) -> &'static str {
        "sales-order-state"
    }

    fn invoice_label(&self) -> &'static str {
        match self.scenario {
            "invoice_collecting" => "invoice-open-state",
            _ => "invoice-paid-state",
        }
    }

    fn payment_label(&self) -> &'static str {
        match self.scenario {
            "invoice_collecting" => "invoice-open-payments",
            _ => "invoice-paid-payments",
        }
    }

    fn loyalty_label(&self) -> &'static str {
        match self.scenario {
            "invoice_collecting" => "invoice-open-loyalty",
            _ => "invoice-paid-loyalty",
        }
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub scenarios_seeded: Vec<ScenarioSeedInfo>,
}

#[derive(Debug)]
pub struct ScenarioSeedInfo {
    pub scenario: &'static str,
    pub quotation_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
