use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "customer",
        "product",
        "quotation",
        "quotation_item",
        "sales_order",
        "invoice",
        "payment",
        "discount",
        "loyalty_token",
        "activity_log",
        "supplier",
        "goods_receipt",
        "goods_receipt_item",
        "stock_transfer",
        "idx_quotation_customer_id",
        "idx_quotation_item_quotation_id",
        "idx_sales_order_customer_id",
        "idx_invoice_customer_id",
        "idx_invoice_quotation_id",
        "idx_invoice_sales_order_id",
        "idx_payment_invoice_id",
        "idx_loyalty_token_customer_id",
        "idx_discount_code",
        "idx_activity_log_occurred_at",
        "idx_goods_receipt_supplier_id",
        "idx_goods_receipt_item_receipt_id",
        "idx_stock_transfer_product_id",
    ];

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let customer_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'customer'",
        )
        .fetch_one(&pool)
        .await
        .expect("check customer table")
        .get::<i64, _>("count");

        let product_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'product'",
        )
        .fetch_one(&pool)
        .await
        .expect("check product table")
        .get::<i64, _>("count");

        let quotation_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'quotation'",
        )
        .fetch_one(&pool)
        .await
        .expect("check quotation table")
        .get::<i64, _>("count");

        let quotation_item_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'quotation_item'",
        )
        .fetch_one(&pool)
        .await
        .expect("check quotation_item table")
        .get::<i64, _>("count");

        let sales_order_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'sales_order'",
        )
        .fetch_one(&pool)
        .await
        .expect("check sales_order table")
        .get::<i64, _>("count");

        let invoice_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'invoice'",
        )
        .fetch_one(&pool)
        .await
        .expect("check invoice table")
        .get::<i64, _>("count");

        let payment_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'payment'",
        )
        .fetch_one(&pool)
        .await
        .expect("check payment table")
        .get::<i64, _>("count");

        let discount_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'discount'",
        )
        .fetch_one(&pool)
        .await
        .expect("check discount table")
        .get::<i64, _>("count");

        let loyalty_token_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'loyalty_token'",
        )
        .fetch_one(&pool)
        .await
        .expect("check loyalty_token table")
        .get::<i64, _>("count");

        let activity_log_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'activity_log'",
        )
        .fetch_one(&pool)
        .await
        .expect("check activity_log table")
        .get::<i64, _>("count");

        let supplier_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'supplier'",
        )
        .fetch_one(&pool)
        .await
        .expect("check supplier table")
        .get::<i64, _>("count");

        let goods_receipt_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'goods_receipt'",
        )
        .fetch_one(&pool)
        .await
        .expect("check goods_receipt table")
        .get::<i64, _>("count");

        let goods_receipt_item_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'goods_receipt_item'",
        )
        .fetch_one(&pool)
        .await
        .expect("check goods_receipt_item table")
        .get::<i64, _>("count");

        let stock_transfer_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'stock_transfer'",
        )
        .fetch_one(&pool)
        .await
        .expect("check stock_transfer table")
        .get::<i64, _>("count");

        assert_eq!(customer_count, 1);
        assert_eq!(product_count, 1);
        assert_eq!(quotation_count, 1);
        assert_eq!(quotation_item_count, 1);
        assert_eq!(sales_order_count, 1);
        assert_eq!(invoice_count, 1);
        assert_eq!(payment_count, 1);
        assert_eq!(discount_count, 1);
        assert_eq!(loyalty_token_count, 1);
        assert_eq!(activity_log_count, 1);
        assert_eq!(supplier_count, 1);
        assert_eq!(goods_receipt_count, 1);
        assert_eq!(goods_receipt_item_count, 1);
        assert_eq!(stock_transfer_count, 1);
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let quotation_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'quotation'",
        )
        .fetch_one(&pool)
        .await
        .expect("check quotation table removed")
        .get::<i64, _>("count");

        assert_eq!(quotation_count, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
