use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::{Product, ProductId, StockLocation};
use crate::domain::supplier::SupplierId;
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoodsReceiptId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoodsReceiptItemId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockTransferId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Completed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceiptItem {
    pub id: GoodsReceiptItemId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_cost: Decimal,
    pub total: Decimal,
}

/// A supplier delivery. Verification is the single point where warehouse
/// stock increases.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceipt {
    pub id: GoodsReceiptId,
    pub supplier_id: SupplierId,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub sub_total: Decimal,
    pub verified: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub items: Vec<GoodsReceiptItem>,
}

impl GoodsReceipt {
    pub fn ensure_can_verify(&self) -> Result<(), WorkflowError> {
        if self.verified {
            return Err(WorkflowError::conflict("GRN already verified"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceiptItemDraft {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_cost: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceiptDraft {
    pub supplier_id: SupplierId,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<GoodsReceiptItemDraft>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransfer {
    pub id: StockTransferId,
    pub product_id: ProductId,
    pub from_location: StockLocation,
    pub to_location: StockLocation,
    pub quantity: u32,
    pub status: TransferStatus,
    pub notes: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StockTransfer {
    pub fn ensure_can_complete(&self) -> Result<(), WorkflowError> {
        if self.status == TransferStatus::Completed {
            return Err(WorkflowError::conflict("Transfer already completed"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransferDraft {
    pub product_id: ProductId,
    pub from_location: StockLocation,
    pub to_location: StockLocation,
    pub quantity: u32,
    pub notes: Option<String>,
}

impl StockTransferDraft {
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.quantity == 0 {
            return Err(WorkflowError::validation("Quantity must be positive"));
        }
        if self.from_location == self.to_location {
            return Err(WorkflowError::validation("From and to locations cannot be the same."));
        }
        Ok(())
    }
}

/// Sufficiency check run at transfer creation and again at completion, right
/// before the stock moves.
pub fn ensure_sufficient_stock(
    product: &Product,
    location: StockLocation,
    quantity: u32,
) -> Result<(), WorkflowError> {
    let available = product.stock_at(location);
    if available < quantity {
        return Err(WorkflowError::validation(format!(
            "Insufficient {} stock. Available: {available}",
            location.as_str()
        )));
    }
    Ok(())
}
