pub mod actor;
pub mod customer;
pub mod discount;
pub mod invoice;
pub mod loyalty;
pub mod payment;
pub mod product;
pub mod quotation;
pub mod sales_order;
pub mod stock;
pub mod supplier;
