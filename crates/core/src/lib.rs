pub mod activity;
pub mod config;
pub mod domain;
pub mod errors;
pub mod money;
pub mod numbering;

pub use activity::ActivityEvent;
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::actor::Actor;
pub use domain::customer::{Customer, CustomerId};
pub use domain::discount::{Discount, DiscountId, DiscountKind, DiscountStatus};
pub use domain::invoice::{DiscountInstruction, FinalBill, Invoice, InvoiceId, InvoiceStatus};
pub use domain::loyalty::{LoyaltyToken, LoyaltyTokenId};
pub use domain::payment::{Payment, PaymentId};
pub use domain::product::{Product, ProductId, StockLocation};
pub use domain::quotation::{
    Quotation, QuotationDraft, QuotationId, QuotationItem, QuotationItemChange, QuotationItemDraft,
    QuotationItemId, QuotationPatch,
};
pub use domain::sales_order::{SalesOrder, SalesOrderId};
pub use domain::stock::{
    GoodsReceipt, GoodsReceiptDraft, GoodsReceiptId, StockTransfer, StockTransferDraft,
    StockTransferId, TransferStatus,
};
pub use domain::supplier::{Supplier, SupplierId};
pub use errors::{ApplicationError, InterfaceError, WorkflowError};
