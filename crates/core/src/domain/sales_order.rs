use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::domain::product::ProductId;
use crate::domain::quotation::{QuotationId, QuotationItem};
use crate::errors::WorkflowError;
use crate::money;

pub const ARRIVAL_STATUS: &str = "arrived_from_quotation";
pub const ARRIVAL_NOTE: &str = "Order received from quotation";
pub const COMPLETED_STATUS: &str = "Completed";
pub const COMPLETED_NOTE: &str = "Sales order marked as complete.";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SalesOrderId(pub String);

/// One frozen quotation line inside the order snapshot. Serialized into the
/// `quotation_snapshot` JSON column; never re-joined against live products.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl From<&QuotationItem> for SnapshotLine {
    fn from(item: &QuotationItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total,
        }
    }
}

/// One entry in the append-only completion-status history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionStep {
    pub date: DateTime<Utc>,
    pub status: String,
    pub note: String,
}

impl CompletionStep {
    pub fn new(status: impl Into<String>, note: impl Into<String>) -> Self {
        Self { date: Utc::now(), status: status.into(), note: note.into() }
    }

    pub fn arrival() -> Self {
        Self::new(ARRIVAL_STATUS, ARRIVAL_NOTE)
    }

    pub fn completed() -> Self {
        Self::new(COMPLETED_STATUS, COMPLETED_NOTE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrder {
    pub id: SalesOrderId,
    pub quotation_id: QuotationId,
    pub customer_id: CustomerId,
    pub customer_name: Option<String>,
    pub quotation_snapshot: Vec<SnapshotLine>,
    pub completion_status: Vec<CompletionStep>,
    pub completion_flag: bool,
    pub approved: bool,
    pub moved_to_invoice: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SalesOrder {
    /// Invoice total for an order-sourced invoice: snapshot line totals
    /// through the same GST formula the quotation used.
    pub fn billable_total(&self) -> Decimal {
        money::quotation_totals(self.quotation_snapshot.iter().map(|line| line.total_price))
            .total_amount
    }

    pub fn ensure_workable(&self) -> Result<(), WorkflowError> {
        if self.completion_flag {
            return Err(WorkflowError::locked("Cannot update work status of a completed order"));
        }
        Ok(())
    }

    pub fn ensure_can_complete(&self) -> Result<(), WorkflowError> {
        if self.completion_flag {
            return Err(WorkflowError::conflict("Sales order is already marked as complete"));
        }
        Ok(())
    }

    pub fn ensure_can_approve(&self) -> Result<(), WorkflowError> {
        if self.approved {
            return Err(WorkflowError::conflict("Order already approved"));
        }
        if !self.completion_flag {
            return Err(WorkflowError::locked("Order not completed yet"));
        }
        Ok(())
    }

    pub fn ensure_can_move_to_invoice(&self) -> Result<(), WorkflowError> {
        if self.moved_to_invoice {
            return Err(WorkflowError::conflict("Order already moved to invoice"));
        }
        if !self.completion_flag {
            return Err(WorkflowError::locked("Order not completed yet"));
        }
        if !self.approved {
            return Err(WorkflowError::locked("Order not approved yet"));
        }
        Ok(())
    }
}
