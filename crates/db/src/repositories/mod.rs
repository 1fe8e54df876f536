use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use orderly_core::errors::WorkflowError;

pub mod activity_log;
pub mod customer;
pub mod discount;
pub mod goods_receipt;
pub mod invoice;
pub mod loyalty;
pub mod payment;
pub mod product;
pub mod quotation;
pub mod sales_order;
pub mod stock_transfer;
pub mod supplier;

pub use activity_log::{ActivityLogRepository, SqlActivityLogRepository};
pub use customer::{CustomerRepository, SqlCustomerRepository};
pub use discount::{DiscountRepository, SqlDiscountRepository};
pub use goods_receipt::{GoodsReceiptRepository, SqlGoodsReceiptRepository};
pub use invoice::{InvoiceRepository, SqlInvoiceRepository};
pub use loyalty::{LoyaltyRepository, SqlLoyaltyRepository};
pub use payment::{PaymentOutcome, PaymentRepository, SqlPaymentRepository};
pub use product::{ProductRepository, SqlProductRepository};
pub use quotation::{QuotationRepository, SqlQuotationRepository};
pub use sales_order::{SalesOrderRepository, SqlSalesOrderRepository};
pub use stock_transfer::{SqlStockTransferRepository, StockTransferRepository};
pub use supplier::{SqlSupplierRepository, SupplierRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for WorkflowError {
    fn from(error: RepositoryError) -> Self {
        WorkflowError::storage(error.to_string())
    }
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    value
        .parse::<Decimal>()
        .map_err(|error| {
            RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
        })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn encode_json<T: serde::Serialize>(
    column: &str,
    value: &T,
) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|error| {
        RepositoryError::Decode(format!("cannot encode `{column}` as JSON ({error})"))
    })
}

pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: String,
) -> Result<T, RepositoryError> {
    serde_json::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid JSON in `{column}` ({error})"))
    })
}

/// Distinguishes a UNIQUE constraint failure from other database errors so
/// callers can retry generated numbers instead of surfacing a hard failure.
pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.is_unique_violation(),
        _ => false,
    }
}
