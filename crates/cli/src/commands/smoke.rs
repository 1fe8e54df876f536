use std::time::Instant;

use crate::commands::CommandResult;
use orderly_core::config::{AppConfig, LoadOptions};
use orderly_core::domain::actor::Actor;
use orderly_core::domain::customer::Customer;
use orderly_core::domain::invoice::InvoiceStatus;
use orderly_core::domain::product::Product;
use orderly_core::domain::quotation::{QuotationDraft, QuotationItemDraft};
use orderly_db::repositories::{
    CustomerRepository, InvoiceRepository, LoyaltyRepository, PaymentRepository,
    ProductRepository, QuotationRepository, SqlCustomerRepository, SqlInvoiceRepository,
    SqlLoyaltyRepository, SqlPaymentRepository, SqlProductRepository, SqlQuotationRepository,
};
use orderly_db::{connect_with_settings, migrations, DbPool};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("order_to_cash_roundtrip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("order_to_cash_roundtrip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(async {
        connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
    });

    let pool = match db_result {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("connected using `{}`", config.database.url),
            });
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("order_to_cash_roundtrip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let migration_started = Instant::now();
    let migration_result = runtime.block_on(async { migrations::run_pending(&pool).await });

    match migration_result {
        Ok(()) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Pass,
            elapsed_ms: migration_started.elapsed().as_millis() as u64,
            message: "migrations are visible and executable".to_string(),
        }),
        Err(error) => {
            checks.push(SmokeCheck {
                name: "migration_visibility",
                status: SmokeStatus::Fail,
                elapsed_ms: migration_started.elapsed().as_millis() as u64,
                message: format!("migration execution failed: {error}"),
            });
            checks.push(skipped("order_to_cash_roundtrip"));
            runtime.block_on(async {
                pool.close().await;
            });
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    }

    let roundtrip_started = Instant::now();
    let roundtrip = runtime
        .block_on(order_to_cash_roundtrip(&pool, config.billing.loyalty_token_rate));
    runtime.block_on(async {
        pool.close().await;
    });

    match roundtrip {
        Ok(message) => checks.push(SmokeCheck {
            name: "order_to_cash_roundtrip",
            status: SmokeStatus::Pass,
            elapsed_ms: roundtrip_started.elapsed().as_millis() as u64,
            message,
        }),
        Err(message) => checks.push(SmokeCheck {
            name: "order_to_cash_roundtrip",
            status: SmokeStatus::Fail,
            elapsed_ms: roundtrip_started.elapsed().as_millis() as u64,
            message,
        }),
    }

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

/// Drives a scratch quotation through billing, settlement, and loyalty
/// award on the configured database, then removes every row it created.
async fn order_to_cash_roundtrip(pool: &DbPool, loyalty_rate: u32) -> Result<String, String> {
    let actor = Actor::new("smoke", "smoke", "system");
    let customer = Customer::new("Smoke Check Customer");
    let product = Product::new("Smoke Check Product", Decimal::new(150_000, 2));

    let outcome = drive_workflow(pool, &actor, &customer, &product, loyalty_rate).await;
    let cleanup = purge_artifacts(pool, &customer.id.0, &product.id.0, &actor.id).await;

    match (outcome, cleanup) {
        (Ok(message), Ok(())) => Ok(message),
        (Ok(_), Err(error)) => Err(format!("workflow completed but cleanup failed: {error}")),
        (Err(message), _) => Err(message),
    }
}

async fn drive_workflow(
    pool: &DbPool,
    actor: &Actor,
    customer: &Customer,
    product: &Product,
    loyalty_rate: u32,
) -> Result<String, String> {
    let customers = SqlCustomerRepository::new(pool.clone());
    let products = SqlProductRepository::new(pool.clone());
    let quotations = SqlQuotationRepository::new(pool.clone());
    let invoices = SqlInvoiceRepository::new(pool.clone());
    let payments = SqlPaymentRepository::new(pool.clone());
    let loyalty = SqlLoyaltyRepository::new(pool.clone());

    customers
        .save(customer.clone(), actor)
        .await
        .map_err(|error| format!("customer save failed: {error}"))?;
    products
        .save(product.clone(), actor)
        .await
        .map_err(|error| format!("product save failed: {error}"))?;

    let draft = QuotationDraft {
        customer_id: customer.id.clone(),
        description: Some("smoke validation order".to_string()),
        notes: None,
        items: vec![QuotationItemDraft { product_id: product.id.clone(), quantity: 1 }],
    };
    let quotation = quotations
        .create(draft, actor)
        .await
        .map_err(|error| format!("quotation create failed: {error}"))?;
    quotations
        .approve(&quotation.id, actor)
        .await
        .map_err(|error| format!("quotation approve failed: {error}"))?;
    quotations
        .move_to_invoice(&quotation.id, actor)
        .await
        .map_err(|error| format!("quotation move failed: {error}"))?;

    let invoice = invoices
        .create_from_quotation(&quotation.id, actor)
        .await
        .map_err(|error| format!("invoice create failed: {error}"))?;
    invoices
        .approve(&invoice.id, None, actor)
        .await
        .map_err(|error| format!("invoice approve failed: {error}"))?;

    let settled = payments
        .add_payment(&invoice.id, invoice.total_amount, Some("cash".to_string()), actor)
        .await
        .map_err(|error| format!("payment failed: {error}"))?;
    if settled.invoice.status != InvoiceStatus::Paid || !settled.invoice.balance_due.is_zero() {
        return Err(format!(
            "invoice not settled after full payment (status {}, balance {})",
            settled.invoice.status.as_str(),
            settled.invoice.balance_due
        ));
    }

    let token = loyalty
        .award_for_invoice(&invoice.id, loyalty_rate, actor)
        .await
        .map_err(|error| format!("loyalty award failed: {error}"))?
        .ok_or_else(|| "loyalty award returned nothing for a settled invoice".to_string())?;

    Ok(format!(
        "quotation {} billed as invoice {} and settled in full; {} loyalty tokens awarded",
        quotation.number, invoice.number, token.tokens
    ))
}

async fn purge_artifacts(
    pool: &DbPool,
    customer_id: &str,
    product_id: &str,
    actor_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM loyalty_token WHERE customer_id = ?")
        .bind(customer_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM payment WHERE customer_id = ?")
        .bind(customer_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM invoice WHERE customer_id = ?")
        .bind(customer_id)
        .execute(pool)
        .await?;
    sqlx::query(
        "DELETE FROM quotation_item
         WHERE quotation_id IN (SELECT id FROM quotation WHERE customer_id = ?)",
    )
    .bind(customer_id)
    .execute(pool)
    .await?;
    sqlx::query("DELETE FROM quotation WHERE customer_id = ?")
        .bind(customer_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM product WHERE id = ?").bind(product_id).execute(pool).await?;
    sqlx::query("DELETE FROM customer WHERE id = ?").bind(customer_id).execute(pool).await?;
    sqlx::query("DELETE FROM activity_log WHERE actor_id = ?")
        .bind(actor_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
