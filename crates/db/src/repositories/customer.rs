use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use orderly_core::activity::ActivityEvent;
use orderly_core::domain::actor::Actor;
use orderly_core::domain::customer::{Customer, CustomerId};
use orderly_core::errors::WorkflowError;

use super::{activity_log, parse_timestamp, RepositoryError};
use crate::DbPool;

#[async_trait::async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn save(&self, customer: Customer, actor: &Actor) -> Result<(), WorkflowError>;
    async fn find_active(&self, id: &CustomerId) -> Result<Option<Customer>, WorkflowError>;
    async fn list_active(&self) -> Result<Vec<Customer>, WorkflowError>;
    async fn soft_delete(&self, id: &CustomerId, actor: &Actor) -> Result<(), WorkflowError>;
}

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn save(&self, customer: Customer, actor: &Actor) -> Result<(), WorkflowError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        sqlx::query(
            "INSERT INTO customer (
                id,
                name,
                email,
                phone,
                address,
                active,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                phone = excluded.phone,
                address = excluded.address,
                active = excluded.active,
                updated_at = excluded.updated_at",
        )
        .bind(&customer.id.0)
        .bind(&customer.name)
        .bind(customer.email.as_deref())
        .bind(customer.phone.as_deref())
        .bind(customer.address.as_deref())
        .bind(customer.active)
        .bind(customer.created_at.to_rfc3339())
        .bind(customer.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        let event = ActivityEvent::new(actor, format!("Customer '{}' saved", customer.name));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_active(&self, id: &CustomerId) -> Result<Option<Customer>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_active_customer(&mut conn, &id.0).await?)
    }

    async fn list_active(&self) -> Result<Vec<Customer>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                name,
                email,
                phone,
                address,
                active,
                created_at,
                updated_at
             FROM customer
             WHERE active = 1
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(customer_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WorkflowError::from)
    }

    async fn soft_delete(&self, id: &CustomerId, actor: &Actor) -> Result<(), WorkflowError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let customer = fetch_active_customer(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("customer", &id.0))?;

        sqlx::query("UPDATE customer SET active = 0, updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;

        let event = ActivityEvent::new(actor, format!("Customer '{}' deleted", customer.name));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }
}

pub(crate) async fn fetch_active_customer(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Customer>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            name,
            email,
            phone,
            address,
            active,
            created_at,
            updated_at
         FROM customer
         WHERE id = ? AND active = 1",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.map(customer_from_row).transpose()
}

fn customer_from_row(row: SqliteRow) -> Result<Customer, RepositoryError> {
    Ok(Customer {
        id: CustomerId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        active: row.try_get("active")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
