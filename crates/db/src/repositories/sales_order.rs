use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use orderly_core::activity::ActivityEvent;
use orderly_core::domain::actor::Actor;
use orderly_core::domain::customer::CustomerId;
use orderly_core::domain::quotation::QuotationId;
use orderly_core::domain::sales_order::{CompletionStep, SalesOrder, SalesOrderId, SnapshotLine};
use orderly_core::errors::WorkflowError;

use super::{
    activity_log, customer, decode_json, encode_json, parse_timestamp, quotation, RepositoryError,
};
use crate::{begin_immediate, DbPool};

#[async_trait::async_trait]
pub trait SalesOrderRepository: Send + Sync {
    /// Freezes the quotation's live lines into a new order snapshot. The
    /// quotation's own move operation gates approval; it is not re-checked
    /// here.
    async fn create_from_quotation(
        &self,
        quotation_id: &QuotationId,
        actor: &Actor,
    ) -> Result<SalesOrder, WorkflowError>;

    async fn update_work_status(
        &self,
        id: &SalesOrderId,
        status: &str,
        note: &str,
        actor: &Actor,
    ) -> Result<SalesOrder, WorkflowError>;

    async fn mark_complete(
        &self,
        id: &SalesOrderId,
        actor: &Actor,
    ) -> Result<SalesOrder, WorkflowError>;

    async fn approve(&self, id: &SalesOrderId, actor: &Actor)
        -> Result<SalesOrder, WorkflowError>;

    async fn move_to_invoice(
        &self,
        id: &SalesOrderId,
        actor: &Actor,
    ) -> Result<SalesOrder, WorkflowError>;

    async fn find_by_id(&self, id: &SalesOrderId) -> Result<Option<SalesOrder>, WorkflowError>;

    async fn list(&self) -> Result<Vec<SalesOrder>, WorkflowError>;
}

pub struct SqlSalesOrderRepository {
    pool: DbPool,
}

impl SqlSalesOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SalesOrderRepository for SqlSalesOrderRepository {
    async fn create_from_quotation(
        &self,
        quotation_id: &QuotationId,
        actor: &Actor,
    ) -> Result<SalesOrder, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let quotation = quotation::fetch_quotation(&mut tx, &quotation_id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("quotation", &quotation_id.0))?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM sales_order WHERE quotation_id = ?")
                .bind(&quotation_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(RepositoryError::from)?;
        if existing.is_some() {
            return Err(WorkflowError::conflict(
                "Sales order already exists for this quotation",
            ));
        }

        let customer_name = customer::fetch_active_customer(&mut tx, &quotation.customer_id.0)
            .await?
            .map(|customer| customer.name);

        let now = Utc::now();
        let order = SalesOrder {
            id: SalesOrderId(format!("so-{}", sqlx::types::Uuid::new_v4())),
            quotation_id: quotation.id.clone(),
            customer_id: quotation.customer_id.clone(),
            customer_name,
            quotation_snapshot: quotation.items.iter().map(SnapshotLine::from).collect(),
            completion_status: vec![CompletionStep::arrival()],
            completion_flag: false,
            approved: false,
            moved_to_invoice: false,
            created_at: now,
            updated_at: now,
        };

        insert_order_row(&mut tx, &order).await?;

        let event = ActivityEvent::new(
            actor,
            format!("Sales order created from quotation '{}'", quotation.number),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(order)
    }

    async fn update_work_status(
        &self,
        id: &SalesOrderId,
        status: &str,
        note: &str,
        actor: &Actor,
    ) -> Result<SalesOrder, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut order = fetch_sales_order(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("sales order", &id.0))?;
        order.ensure_workable()?;

        order.completion_status.push(CompletionStep::new(status, note));
        order.updated_at = Utc::now();
        update_order_row(&mut tx, &order).await?;

        let event = ActivityEvent::new(
            actor,
            format!("Sales order '{}' work status set to '{}'", order.id.0, status),
        );
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(order)
    }

    async fn mark_complete(
        &self,
        id: &SalesOrderId,
        actor: &Actor,
    ) -> Result<SalesOrder, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut order = fetch_sales_order(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("sales order", &id.0))?;
        order.ensure_can_complete()?;

        order.completion_status.push(CompletionStep::completed());
        order.completion_flag = true;
        order.updated_at = Utc::now();
        update_order_row(&mut tx, &order).await?;

        let event =
            ActivityEvent::new(actor, format!("Sales order '{}' marked complete", order.id.0));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(order)
    }

    async fn approve(
        &self,
        id: &SalesOrderId,
        actor: &Actor,
    ) -> Result<SalesOrder, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut order = fetch_sales_order(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("sales order", &id.0))?;
        order.ensure_can_approve()?;

        order.approved = true;
        order.updated_at = Utc::now();
        update_order_row(&mut tx, &order).await?;

        let event = ActivityEvent::new(actor, format!("Sales order '{}' approved", order.id.0));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(order)
    }

    async fn move_to_invoice(
        &self,
        id: &SalesOrderId,
        actor: &Actor,
    ) -> Result<SalesOrder, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut order = fetch_sales_order(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("sales order", &id.0))?;
        order.ensure_can_move_to_invoice()?;

        order.moved_to_invoice = true;
        order.updated_at = Utc::now();
        update_order_row(&mut tx, &order).await?;

        let event =
            ActivityEvent::new(actor, format!("Sales order '{}' moved to invoice", order.id.0));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(order)
    }

    async fn find_by_id(&self, id: &SalesOrderId) -> Result<Option<SalesOrder>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_sales_order(&mut conn, &id.0).await?)
    }

    async fn list(&self) -> Result<Vec<SalesOrder>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                quotation_id,
                customer_id,
                customer_name,
                quotation_snapshot,
                completion_status,
                completion_flag,
                approved,
                moved_to_invoice,
                created_at,
                updated_at
             FROM sales_order
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(order_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WorkflowError::from)
    }
}

pub(crate) async fn fetch_sales_order(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<SalesOrder>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            quotation_id,
            customer_id,
            customer_name,
            quotation_snapshot,
            completion_status,
            completion_flag,
            approved,
            moved_to_invoice,
            created_at,
            updated_at
         FROM sales_order
         WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.map(order_from_row).transpose()
}

async fn insert_order_row(
    conn: &mut SqliteConnection,
    order: &SalesOrder,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO sales_order (
            id,
            quotation_id,
            customer_id,
            customer_name,
            quotation_snapshot,
            completion_status,
            completion_flag,
            approved,
            moved_to_invoice,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&order.id.0)
    .bind(&order.quotation_id.0)
    .bind(&order.customer_id.0)
    .bind(order.customer_name.as_deref())
    .bind(encode_json("quotation_snapshot", &order.quotation_snapshot)?)
    .bind(encode_json("completion_status", &order.completion_status)?)
    .bind(order.completion_flag)
    .bind(order.approved)
    .bind(order.moved_to_invoice)
    .bind(order.created_at.to_rfc3339())
    .bind(order.updated_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

async fn update_order_row(
    conn: &mut SqliteConnection,
    order: &SalesOrder,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE sales_order SET
            completion_status = ?,
            completion_flag = ?,
            approved = ?,
            moved_to_invoice = ?,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(encode_json("completion_status", &order.completion_status)?)
    .bind(order.completion_flag)
    .bind(order.approved)
    .bind(order.moved_to_invoice)
    .bind(order.updated_at.to_rfc3339())
    .bind(&order.id.0)
    .execute(conn)
    .await?;

    Ok(())
}

fn order_from_row(row: SqliteRow) -> Result<SalesOrder, RepositoryError> {
    Ok(SalesOrder {
        id: SalesOrderId(row.try_get("id")?),
        quotation_id: QuotationId(row.try_get("quotation_id")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        customer_name: row.try_get("customer_name")?,
        quotation_snapshot: decode_json(
            "quotation_snapshot",
            row.try_get::<String, _>("quotation_snapshot")?,
        )?,
        completion_status: decode_json(
            "completion_status",
            row.try_get::<String, _>("completion_status")?,
        )?,
        completion_flag: row.try_get("completion_flag")?,
        approved: row.try_get("approved")?,
        moved_to_invoice: row.try_get("moved_to_invoice")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use orderly_core::domain::actor::Actor;
    use orderly_core::domain::customer::Customer;
    use orderly_core::domain::product::Product;
    use orderly_core::domain::quotation::{
        Quotation, QuotationDraft, QuotationId, QuotationItemDraft,
    };
    use orderly_core::domain::sales_order::{ARRIVAL_STATUS, COMPLETED_STATUS};
    use orderly_core::errors::WorkflowError;

    use super::{SalesOrderRepository, SqlSalesOrderRepository};
    use crate::repositories::{
        CustomerRepository, ProductRepository, QuotationRepository, SqlCustomerRepository,
        SqlProductRepository, SqlQuotationRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    #[tokio::test]
    async fn create_freezes_quotation_lines_into_a_snapshot() {
        let pool = setup_pool().await;
        let repo = SqlSalesOrderRepository::new(pool.clone());
        let actor = Actor::system();

        let quotation = orderable_quotation(&pool).await;
        let order = repo
            .create_from_quotation(&quotation.id, &actor)
            .await
            .expect("create sales order");

        assert_eq!(order.quotation_id, quotation.id);
        assert_eq!(order.customer_name.as_deref(), Some("Acme Traders"));
        assert_eq!(order.quotation_snapshot.len(), 2);
        assert_eq!(order.quotation_snapshot[0].product_name, "Teak Chair");
        assert_eq!(order.quotation_snapshot[0].total_price, Decimal::new(100000, 2));
        assert_eq!(order.billable_total(), Decimal::new(236000, 2));
        assert_eq!(order.completion_status.len(), 1);
        assert_eq!(order.completion_status[0].status, ARRIVAL_STATUS);
        assert!(!order.completion_flag);

        let duplicate = repo.create_from_quotation(&quotation.id, &actor).await;
        assert!(matches!(duplicate, Err(WorkflowError::Conflict { .. })));

        let missing = repo
            .create_from_quotation(&QuotationId("quot-absent".to_owned()), &actor)
            .await;
        assert!(matches!(missing, Err(WorkflowError::NotFound { .. })));

        let found = repo.find_by_id(&order.id).await.expect("find order");
        assert_eq!(found, Some(order));

        pool.close().await;
    }

    #[tokio::test]
    async fn work_status_history_appends_until_completion() {
        let pool = setup_pool().await;
        let repo = SqlSalesOrderRepository::new(pool.clone());
        let actor = Actor::system();

        let quotation = orderable_quotation(&pool).await;
        let order = repo
            .create_from_quotation(&quotation.id, &actor)
            .await
            .expect("create sales order");

        let in_production = repo
            .update_work_status(&order.id, "in_production", "Frames cut", &actor)
            .await
            .expect("update work status");
        assert_eq!(in_production.completion_status.len(), 2);
        assert_eq!(in_production.completion_status[1].status, "in_production");
        assert_eq!(in_production.completion_status[1].note, "Frames cut");

        let completed = repo.mark_complete(&order.id, &actor).await.expect("mark complete");
        assert!(completed.completion_flag);
        assert_eq!(
            completed.completion_status.last().map(|step| step.status.as_str()),
            Some(COMPLETED_STATUS)
        );

        let again = repo.mark_complete(&order.id, &actor).await;
        assert!(matches!(again, Err(WorkflowError::Conflict { .. })));

        let after_completion = repo
            .update_work_status(&order.id, "repainting", "Touch-up", &actor)
            .await;
        assert!(matches!(after_completion, Err(WorkflowError::LockedState { .. })));

        pool.close().await;
    }

    #[tokio::test]
    async fn approval_and_invoice_move_require_completion_first() {
        let pool = setup_pool().await;
        let repo = SqlSalesOrderRepository::new(pool.clone());
        let actor = Actor::system();

        let quotation = orderable_quotation(&pool).await;
        let order = repo
            .create_from_quotation(&quotation.id, &actor)
            .await
            .expect("create sales order");

        let early_approve = repo.approve(&order.id, &actor).await;
        assert!(matches!(early_approve, Err(WorkflowError::LockedState { .. })));

        repo.mark_complete(&order.id, &actor).await.expect("mark complete");

        let unapproved_move = repo.move_to_invoice(&order.id, &actor).await;
        assert!(matches!(unapproved_move, Err(WorkflowError::LockedState { .. })));

        repo.approve(&order.id, &actor).await.expect("approve");
        let double_approve = repo.approve(&order.id, &actor).await;
        assert!(matches!(double_approve, Err(WorkflowError::Conflict { .. })));

        let moved = repo.move_to_invoice(&order.id, &actor).await.expect("move to invoice");
        assert!(moved.moved_to_invoice);
        let double_move = repo.move_to_invoice(&order.id, &actor).await;
        assert!(matches!(double_move, Err(WorkflowError::Conflict { .. })));

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn orderable_quotation(pool: &DbPool) -> Quotation {
        let actor = Actor::system();
        let customer = Customer::new("Acme Traders");
        SqlCustomerRepository::new(pool.clone())
            .save(customer.clone(), &actor)
            .await
            .expect("seed customer");

        let products = SqlProductRepository::new(pool.clone());
        let chair = Product::new("Teak Chair", Decimal::new(50000, 2));
        let table = Product::new("Dining Table", Decimal::new(100000, 2));
        products.save(chair.clone(), &actor).await.expect("seed chair");
        products.save(table.clone(), &actor).await.expect("seed table");

        let quotations = SqlQuotationRepository::new(pool.clone());
        let quotation = quotations
            .create(
                QuotationDraft {
                    customer_id: customer.id.clone(),
                    description: None,
                    notes: None,
                    items: vec![
                        QuotationItemDraft { product_id: chair.id.clone(), quantity: 2 },
                        QuotationItemDraft { product_id: table.id.clone(), quantity: 1 },
                    ],
                },
                &actor,
            )
            .await
            .expect("seed quotation");
        quotations.approve(&quotation.id, &actor).await.expect("approve quotation");
        quotations.move_to_sales(&quotation.id, &actor).await.expect("move quotation")
    }
}
