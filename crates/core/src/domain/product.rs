use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

/// Where live stock sits. Orders never touch these quantities; only goods
/// receipts and stock transfers do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockLocation {
    Showroom,
    Warehouse,
}

impl StockLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Showroom => "showroom",
            Self::Warehouse => "warehouse",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "showroom" => Some(Self::Showroom),
            "warehouse" => Some(Self::Warehouse),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: Option<String>,
    pub price: Decimal,
    pub quantity_showroom: u32,
    pub quantity_warehouse: u32,
    pub min_stock_threshold: u32,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(name: impl Into<String>, price: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: ProductId(format!("prod-{}", Uuid::new_v4())),
            name: name.into(),
            category: None,
            price,
            quantity_showroom: 0,
            quantity_warehouse: 0,
            min_stock_threshold: 0,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stock_at(&self, location: StockLocation) -> u32 {
        match location {
            StockLocation::Showroom => self.quantity_showroom,
            StockLocation::Warehouse => self.quantity_warehouse,
        }
    }

    pub fn combined_stock(&self) -> u32 {
        self.quantity_showroom + self.quantity_warehouse
    }
}
