use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::domain::product::ProductId;
use crate::errors::WorkflowError;
use crate::money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationItemId(pub String);

/// A quotation line. `product_name` and `unit_price` are frozen at the time
/// the line is added; later product edits must not reach existing quotations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationItem {
    pub id: QuotationItemId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total: Decimal,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotation {
    pub id: QuotationId,
    pub number: String,
    pub customer_id: CustomerId,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub total_items_amount: Decimal,
    pub gst_amount: Decimal,
    pub total_amount: Decimal,
    pub approved: bool,
    pub moved_to_sales: bool,
    pub moved_to_invoice: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<QuotationItem>,
}

impl Quotation {
    pub fn surviving_items(&self) -> impl Iterator<Item = &QuotationItem> {
        self.items.iter().filter(|item| !item.deleted)
    }

    /// Either move flag permanently locks line-item edits.
    pub fn is_locked(&self) -> bool {
        self.moved_to_sales || self.moved_to_invoice
    }

    pub fn has_live_product(&self, product_id: &ProductId) -> bool {
        self.surviving_items().any(|item| &item.product_id == product_id)
    }

    /// Recomputes the three aggregate columns from surviving lines. Runs
    /// after every item mutation.
    pub fn recompute_totals(&mut self) {
        let totals = money::quotation_totals(self.surviving_items().map(|item| item.total));
        self.total_items_amount = totals.total_items_amount;
        self.gst_amount = totals.gst_amount;
        self.total_amount = totals.total_amount;
    }

    pub fn ensure_editable(&self) -> Result<(), WorkflowError> {
        if self.moved_to_sales {
            return Err(WorkflowError::locked("Quotation already moved to sales order; cannot edit"));
        }
        if self.moved_to_invoice {
            return Err(WorkflowError::locked("Quotation already moved to invoice; cannot edit"));
        }
        Ok(())
    }

    pub fn ensure_can_approve(&self) -> Result<(), WorkflowError> {
        if self.approved {
            return Err(WorkflowError::conflict("Quotation already approved"));
        }
        Ok(())
    }

    pub fn ensure_can_move_to_sales(&self) -> Result<(), WorkflowError> {
        if self.moved_to_sales {
            return Err(WorkflowError::conflict("Quotation already moved to sales order"));
        }
        if !self.approved {
            return Err(WorkflowError::locked("Quotation must be approved before moving to sales"));
        }
        Ok(())
    }

    pub fn ensure_can_move_to_invoice(&self) -> Result<(), WorkflowError> {
        if self.moved_to_invoice {
            return Err(WorkflowError::conflict("Quotation already moved to invoice"));
        }
        if !self.approved {
            return Err(WorkflowError::locked(
                "Quotation must be approved or moved to sales before invoicing",
            ));
        }
        Ok(())
    }

    pub fn ensure_can_soft_delete(&self) -> Result<(), WorkflowError> {
        if self.moved_to_sales {
            return Err(WorkflowError::locked("Cannot delete a quotation moved to sales order"));
        }
        Ok(())
    }

    pub fn ensure_item_removable(&self) -> Result<(), WorkflowError> {
        if self.is_locked() {
            return Err(WorkflowError::locked(
                "Cannot delete item from a quotation already moved to sales or invoice",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationItemDraft {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationDraft {
    pub customer_id: CustomerId,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<QuotationItemDraft>,
}

/// One edit instruction inside a quotation update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotationItemChange {
    Add(QuotationItemDraft),
    SetQuantity { item_id: QuotationItemId, quantity: u32 },
    Remove { item_id: QuotationItemId },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationPatch {
    pub customer_id: Option<CustomerId>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<QuotationItemChange>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use crate::domain::customer::CustomerId;
    use crate::domain::product::ProductId;
    use crate::errors::WorkflowError;
    use crate::money;

    use super::{Quotation, QuotationId, QuotationItem, QuotationItemId};

    fn item(product: &str, quantity: u32, unit_price: Decimal) -> QuotationItem {
        let now = Utc::now();
        QuotationItem {
            id: QuotationItemId(format!("qitem-{}", Uuid::new_v4())),
            product_id: ProductId(product.to_owned()),
            product_name: product.to_owned(),
            quantity,
            unit_price,
            total: money::line_total(quantity, unit_price),
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn quotation(items: Vec<QuotationItem>) -> Quotation {
        let now = Utc::now();
        let mut quotation = Quotation {
            id: QuotationId("quot-1".to_owned()),
            number: "QTN-20250131-0001".to_owned(),
            customer_id: CustomerId("cust-1".to_owned()),
            description: None,
            notes: None,
            total_items_amount: Decimal::ZERO,
            gst_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            approved: false,
            moved_to_sales: false,
            moved_to_invoice: false,
            deleted: false,
            created_at: now,
            updated_at: now,
            items,
        };
        quotation.recompute_totals();
        quotation
    }

    #[test]
    fn totals_follow_the_gst_formula() {
        let quotation = quotation(vec![
            item("prod-chair", 2, Decimal::new(50000, 2)),
            item("prod-table", 1, Decimal::new(100000, 2)),
        ]);

        assert_eq!(quotation.total_items_amount, Decimal::new(200000, 2));
        assert_eq!(quotation.gst_amount, Decimal::new(36000, 2));
        assert_eq!(quotation.total_amount, Decimal::new(236000, 2));
    }

    #[test]
    fn soft_deleted_items_leave_the_totals() {
        let mut quotation = quotation(vec![
            item("prod-chair", 2, Decimal::new(50000, 2)),
            item("prod-table", 1, Decimal::new(100000, 2)),
        ]);

        quotation.items[1].deleted = true;
        quotation.recompute_totals();

        assert_eq!(quotation.total_items_amount, Decimal::new(100000, 2));
        assert_eq!(quotation.gst_amount, Decimal::new(18000, 2));
        assert_eq!(quotation.total_amount, Decimal::new(118000, 2));
    }

    #[test]
    fn removing_the_last_line_zeroes_the_totals() {
        let mut quotation = quotation(vec![item("prod-chair", 1, Decimal::new(50000, 2))]);

        quotation.items[0].deleted = true;
        quotation.recompute_totals();

        assert_eq!(quotation.total_items_amount, Decimal::ZERO);
        assert_eq!(quotation.total_amount, Decimal::ZERO);
    }

    #[test]
    fn duplicate_product_check_skips_soft_deleted_lines() {
        let mut quotation = quotation(vec![item("prod-chair", 1, Decimal::new(50000, 2))]);
        assert!(quotation.has_live_product(&ProductId("prod-chair".to_owned())));

        quotation.items[0].deleted = true;
        assert!(!quotation.has_live_product(&ProductId("prod-chair".to_owned())));
    }

    #[test]
    fn approval_does_not_lock_edits_but_moves_do() {
        let mut quotation = quotation(vec![item("prod-chair", 1, Decimal::new(50000, 2))]);
        quotation.approved = true;
        assert!(quotation.ensure_editable().is_ok());

        quotation.moved_to_sales = true;
        let error = quotation.ensure_editable().expect_err("moved quotation is locked");
        assert!(matches!(error, WorkflowError::LockedState { .. }));
    }

    #[test]
    fn approve_is_one_way() {
        let mut quotation = quotation(vec![item("prod-chair", 1, Decimal::new(50000, 2))]);
        assert!(quotation.ensure_can_approve().is_ok());

        quotation.approved = true;
        let error = quotation.ensure_can_approve().expect_err("second approve");
        assert!(matches!(error, WorkflowError::Conflict { .. }));
    }

    #[test]
    fn moves_require_prior_approval() {
        let quotation = quotation(vec![item("prod-chair", 1, Decimal::new(50000, 2))]);

        let to_sales = quotation.ensure_can_move_to_sales().expect_err("unapproved move");
        let to_invoice = quotation.ensure_can_move_to_invoice().expect_err("unapproved move");

        assert!(matches!(to_sales, WorkflowError::LockedState { .. }));
        assert!(matches!(to_invoice, WorkflowError::LockedState { .. }));
    }

    #[test]
    fn second_move_conflicts() {
        let mut quotation = quotation(vec![item("prod-chair", 1, Decimal::new(50000, 2))]);
        quotation.approved = true;
        quotation.moved_to_sales = true;

        let error = quotation.ensure_can_move_to_sales().expect_err("double move");
        assert!(matches!(error, WorkflowError::Conflict { .. }));
    }

    #[test]
    fn soft_delete_blocked_once_moved_to_sales() {
        let mut quotation = quotation(vec![item("prod-chair", 1, Decimal::new(50000, 2))]);
        assert!(quotation.ensure_can_soft_delete().is_ok());

        quotation.moved_to_sales = true;
        assert!(quotation.ensure_can_soft_delete().is_err());
    }
}
