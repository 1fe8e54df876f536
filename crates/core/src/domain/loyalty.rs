use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::customer::CustomerId;
use crate::domain::invoice::InvoiceId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoyaltyTokenId(pub String);

/// Tokens awarded for one fully paid invoice. At most one row per invoice;
/// the invoice's `loyalty_claimed` flag is the idempotency gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyToken {
    pub id: LoyaltyTokenId,
    pub customer_id: CustomerId,
    pub invoice_id: InvoiceId,
    pub tokens: i64,
    pub created_at: DateTime<Utc>,
}

impl LoyaltyToken {
    pub fn new(customer_id: CustomerId, invoice_id: InvoiceId, tokens: i64) -> Self {
        Self {
            id: LoyaltyTokenId(format!("loy-{}", Uuid::new_v4())),
            customer_id,
            invoice_id,
            tokens,
            created_at: Utc::now(),
        }
    }
}
