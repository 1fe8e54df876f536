use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::customer::CustomerId;
use crate::domain::invoice::InvoiceId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub String);

/// An accepted payment. Append-only; corrections are modeled as new
/// payments, never edits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub amount: Decimal,
    pub method: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        invoice_id: InvoiceId,
        customer_id: CustomerId,
        amount: Decimal,
        method: Option<String>,
    ) -> Self {
        Self {
            id: PaymentId(format!("pay-{}", Uuid::new_v4())),
            invoice_id,
            customer_id,
            amount,
            method,
            created_at: Utc::now(),
        }
    }
}
