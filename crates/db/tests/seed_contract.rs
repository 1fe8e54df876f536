//! The demo dataset is a contract: every seeded row must decode through the
//! repositories, and the workflow must be able to pick up where each scenario
//! left off.

use rust_decimal::Decimal;

use orderly_core::domain::actor::Actor;
use orderly_core::domain::customer::CustomerId;
use orderly_core::domain::invoice::{DiscountInstruction, InvoiceId, InvoiceStatus};
use orderly_core::domain::quotation::QuotationId;
use orderly_core::domain::sales_order::SalesOrderId;
use orderly_core::domain::stock::{GoodsReceiptId, StockTransferId};
use orderly_core::errors::WorkflowError;
use orderly_db::repositories::{
    CustomerRepository, DiscountRepository, GoodsReceiptRepository, InvoiceRepository,
    LoyaltyRepository, PaymentRepository, QuotationRepository, SalesOrderRepository,
    SqlCustomerRepository, SqlDiscountRepository, SqlGoodsReceiptRepository, SqlInvoiceRepository,
    SqlLoyaltyRepository, SqlPaymentRepository, SqlQuotationRepository, SqlSalesOrderRepository,
    SqlStockTransferRepository, StockTransferRepository,
};
use orderly_db::{connect_with_settings, migrations, DbPool, DemoSeedDataset};

async fn seeded_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
        .await
        .expect("connect to test database");
    migrations::run_pending(&pool).await.expect("run migrations");
    DemoSeedDataset::load(&pool).await.expect("load demo dataset");
    pool
}

#[tokio::test]
async fn every_seeded_aggregate_decodes_through_its_repository() {
    let pool = seeded_pool().await;

    let quotations = SqlQuotationRepository::new(pool.clone());
    let draft = quotations
        .find_by_id(&QuotationId("quot-demo-draft".to_owned()))
        .await
        .expect("find draft quotation")
        .expect("draft quotation seeded");
    assert_eq!(draft.number, "QTN-20260810-0002");
    assert_eq!(draft.items.len(), 2);
    assert_eq!(draft.total_amount, Decimal::new(236000, 2));
    assert!(!draft.approved);

    assert_eq!(quotations.list_active().await.expect("list quotations").len(), 4);
    let billable = quotations.list_billable().await.expect("list billable");
    assert_eq!(billable.len(), 1);
    assert_eq!(billable[0].id.0, "quot-demo-order");

    let orders = SqlSalesOrderRepository::new(pool.clone());
    let order = orders
        .find_by_id(&SalesOrderId("so-demo-order".to_owned()))
        .await
        .expect("find sales order")
        .expect("sales order seeded");
    assert_eq!(order.quotation_snapshot.len(), 1);
    assert_eq!(order.quotation_snapshot[0].product_name, "Leather Sofa");
    assert_eq!(order.completion_status.len(), 2);
    assert_eq!(order.completion_status[1].status, "in_production");
    assert_eq!(order.billable_total(), Decimal::new(236000, 2));
    assert!(!order.completion_flag);

    let invoices = SqlInvoiceRepository::new(pool.clone());
    let open = invoices
        .find_by_id(&InvoiceId("inv-demo-open".to_owned()))
        .await
        .expect("find open invoice")
        .expect("open invoice seeded");
    assert_eq!(open.status, InvoiceStatus::PartiallyPaid);
    assert_eq!(open.balance_due, Decimal::new(272000, 2));
    assert!(open.approved_by_admin);

    let paid = invoices
        .find_by_id(&InvoiceId("inv-demo-paid".to_owned()))
        .await
        .expect("find paid invoice")
        .expect("paid invoice seeded");
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(paid.balance_due, Decimal::new(0, 2));
    assert!(paid.loyalty_claimed);

    let bill = invoices
        .final_bill(&InvoiceId("inv-demo-paid".to_owned()))
        .await
        .expect("final bill");
    assert_eq!(bill.total_paid, Decimal::new(236000, 2));
    assert_eq!(bill.status, InvoiceStatus::Paid);

    let payments = SqlPaymentRepository::new(pool.clone());
    let history = payments
        .list_for_invoice(&InvoiceId("inv-demo-paid".to_owned()))
        .await
        .expect("payment history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].amount, Decimal::new(100000, 2));
    assert_eq!(history[1].method.as_deref(), Some("cash"));

    let loyalty = SqlLoyaltyRepository::new(pool.clone());
    let tokens = loyalty
        .list_for_customer(&CustomerId("cust-demo-rao".to_owned()))
        .await
        .expect("loyalty tokens");
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].tokens, 6);

    let customers = SqlCustomerRepository::new(pool.clone());
    assert_eq!(customers.list_active().await.expect("list customers").len(), 2);

    let discounts = SqlDiscountRepository::new(pool.clone());
    let welcome = discounts
        .find_live_by_code("WELCOME10")
        .await
        .expect("find discount")
        .expect("discount seeded");
    assert_eq!(welcome.used_count, 0);

    let receipts = SqlGoodsReceiptRepository::new(pool.clone());
    let receipt = receipts
        .find_by_id(&GoodsReceiptId("grn-demo-july".to_owned()))
        .await
        .expect("find goods receipt")
        .expect("goods receipt seeded");
    assert!(receipt.verified);
    assert_eq!(receipt.items.len(), 2);
    assert_eq!(receipt.sub_total, Decimal::new(900000, 2));

    let transfers = SqlStockTransferRepository::new(pool.clone());
    let transfer = transfers
        .find_by_id(&StockTransferId("xfer-demo-floor".to_owned()))
        .await
        .expect("find stock transfer")
        .expect("stock transfer seeded");
    assert_eq!(transfer.quantity, 2);
    assert!(transfer.completed_at.is_none());

    pool.close().await;
}

#[tokio::test]
async fn seeded_scenarios_resume_the_workflow_where_they_stopped() {
    let pool = seeded_pool().await;
    let actor = Actor::system();

    // The in-production order takes another work status update.
    let orders = SqlSalesOrderRepository::new(pool.clone());
    let order_id = SalesOrderId("so-demo-order".to_owned());
    let updated = orders
        .update_work_status(&order_id, "polishing", "Final coat applied", &actor)
        .await
        .expect("append work status");
    assert_eq!(updated.completion_status.len(), 3);

    // The collecting invoice settles and earns loyalty tokens.
    let invoices = SqlInvoiceRepository::new(pool.clone());
    let payments = SqlPaymentRepository::new(pool.clone());
    let loyalty = SqlLoyaltyRepository::new(pool.clone());
    let open_id = InvoiceId("inv-demo-open".to_owned());

    let outcome = payments
        .add_payment(&open_id, Decimal::new(272000, 2), Some("bank_transfer".to_owned()), &actor)
        .await
        .expect("settle open invoice");
    assert_eq!(outcome.invoice.status, InvoiceStatus::Paid);
    assert_eq!(outcome.invoice.balance_due, Decimal::ZERO);

    let token = loyalty
        .award_for_invoice(&open_id, 2, &actor)
        .await
        .expect("award loyalty")
        .expect("tokens due on a 4720.00 invoice");
    assert_eq!(token.tokens, 8);

    // Finished chains refuse to run backwards.
    let quotations = SqlQuotationRepository::new(pool.clone());
    let moved_again = quotations
        .move_to_sales(&QuotationId("quot-demo-order".to_owned()), &actor)
        .await;
    assert!(matches!(moved_again, Err(WorkflowError::Conflict { .. })));

    let paid_id = InvoiceId("inv-demo-paid".to_owned());
    let late_discount = invoices
        .apply_discount(&paid_id, DiscountInstruction::Code("WELCOME10".to_owned()), None, &actor)
        .await;
    assert!(matches!(late_discount, Err(WorkflowError::LockedState { .. })));

    pool.close().await;
}
