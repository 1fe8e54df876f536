use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::domain::quotation::QuotationId;
use crate::domain::sales_order::SalesOrderId;
use crate::errors::WorkflowError;
use crate::money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvoiceId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Approved,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
            Self::Approved => "approved",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "partially_paid" => Some(Self::PartiallyPaid),
            "paid" => Some(Self::Paid),
            "approved" => Some(Self::Approved),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// How a discount reaches an invoice: a raw administrative amount, or a
/// coupon code resolved against the discount registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountInstruction {
    Flat(Decimal),
    Code(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub number: String,
    pub customer_id: CustomerId,
    pub quotation_id: Option<QuotationId>,
    pub sales_order_id: Option<SalesOrderId>,
    pub total_amount: Decimal,
    pub discounted_amount: Decimal,
    pub total_paid: Decimal,
    pub balance_due: Decimal,
    pub status: InvoiceStatus,
    pub approved_by_admin: bool,
    pub loyalty_claimed: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn balance(&self) -> Decimal {
        money::balance_due(self.total_amount, self.discounted_amount, self.total_paid)
    }

    /// Re-derives balance and settlement status after a discount or payment
    /// write. `approve` overrides the status separately.
    pub fn recompute_settlement(&mut self) {
        self.balance_due = self.balance();
        self.status = if self.balance_due == Decimal::ZERO {
            InvoiceStatus::Paid
        } else if self.total_paid > Decimal::ZERO {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::Pending
        };
    }

    pub fn ensure_can_discount(&self) -> Result<(), WorkflowError> {
        if self.discounted_amount > Decimal::ZERO {
            return Err(WorkflowError::conflict("Discount has already been applied to this invoice"));
        }
        if self.status == InvoiceStatus::Paid {
            return Err(WorkflowError::locked("Cannot apply discount to a paid invoice"));
        }
        if self.status == InvoiceStatus::Cancelled {
            return Err(WorkflowError::locked("Cannot apply discount to a cancelled invoice"));
        }
        Ok(())
    }

    /// Bounds check shared by the direct path and the approval-time fold.
    pub fn validate_discount_amount(&self, amount: Decimal) -> Result<(), WorkflowError> {
        if amount < Decimal::ZERO {
            return Err(WorkflowError::validation("Discount must be non-negative"));
        }
        if amount > self.total_amount {
            return Err(WorkflowError::validation("Discount cannot exceed invoice total"));
        }
        Ok(())
    }

    pub fn ensure_can_approve(&self) -> Result<(), WorkflowError> {
        if self.approved_by_admin {
            return Err(WorkflowError::conflict("Invoice already approved"));
        }
        if self.status == InvoiceStatus::Cancelled {
            return Err(WorkflowError::locked("Cannot approve a cancelled invoice"));
        }
        if self.total_amount <= Decimal::ZERO {
            return Err(WorkflowError::validation("Cannot approve invoice with zero total"));
        }
        Ok(())
    }

    /// Validates a payment of `amount` (already rounded to two places) and
    /// returns the current balance the payment was checked against.
    pub fn ensure_payment_allowed(&self, amount: Decimal) -> Result<Decimal, WorkflowError> {
        if amount <= Decimal::ZERO {
            return Err(WorkflowError::validation("Payment amount must be positive"));
        }
        if self.status == InvoiceStatus::Cancelled {
            return Err(WorkflowError::locked("Cannot add payment to a cancelled invoice"));
        }
        if !self.approved_by_admin {
            return Err(WorkflowError::locked("Invoice not Approved"));
        }
        let balance = self.balance();
        if amount > balance {
            return Err(WorkflowError::validation(format!(
                "Payment exceeds balance. Max allowed: {balance}"
            )));
        }
        Ok(balance)
    }

    pub fn ensure_can_cancel(&self) -> Result<(), WorkflowError> {
        if self.status == InvoiceStatus::Cancelled {
            return Err(WorkflowError::conflict("Invoice already cancelled"));
        }
        if self.status == InvoiceStatus::Paid {
            return Err(WorkflowError::locked("Cannot cancel a paid invoice"));
        }
        Ok(())
    }

    /// Billing summary straight off the stored aggregates. No recomputation.
    pub fn final_bill(&self) -> FinalBill {
        FinalBill {
            invoice_number: self.number.clone(),
            customer_id: self.customer_id.clone(),
            subtotal: self.total_amount,
            discount: self.discounted_amount,
            total_paid: self.total_paid,
            balance_due: self.balance_due,
            status: self.status,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalBill {
    pub invoice_number: String,
    pub customer_id: CustomerId,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total_paid: Decimal,
    pub balance_due: Decimal,
    pub status: InvoiceStatus,
}
