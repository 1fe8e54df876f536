use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;
use crate::money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscountId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    Percentage,
    Flat,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Flat => "flat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "percentage" => Some(Self::Percentage),
            "flat" => Some(Self::Flat),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountStatus {
    Active,
    Inactive,
}

impl DiscountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub id: DiscountId,
    pub name: String,
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub usage_limit: Option<u32>,
    pub used_count: u32,
    pub status: DiscountStatus,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Discount {
    /// Field validation applied on create and after every update.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.start_date >= self.end_date {
            return Err(WorkflowError::validation("Start date must be before end date"));
        }
        match self.kind {
            DiscountKind::Percentage => {
                if self.value <= Decimal::ZERO || self.value > Decimal::ONE_HUNDRED {
                    return Err(WorkflowError::validation(
                        "Percentage discount must be between 0 and 100",
                    ));
                }
            }
            DiscountKind::Flat => {
                if self.value <= Decimal::ZERO {
                    return Err(WorkflowError::validation("Flat discount must be greater than 0"));
                }
            }
        }
        if self.usage_limit == Some(0) {
            return Err(WorkflowError::validation("Usage limit must be greater than 0"));
        }
        Ok(())
    }

    /// Whether a coupon code can be redeemed today. The validity window is
    /// inclusive at both ends.
    pub fn ensure_redeemable(&self, today: NaiveDate) -> Result<(), WorkflowError> {
        if self.status != DiscountStatus::Active {
            return Err(WorkflowError::validation("Discount is not active"));
        }
        if today < self.start_date || today > self.end_date {
            return Err(WorkflowError::validation("Discount is not valid today"));
        }
        if let Some(limit) = self.usage_limit {
            if self.used_count >= limit {
                return Err(WorkflowError::validation("Discount usage limit reached"));
            }
        }
        Ok(())
    }

    pub fn ensure_can_reactivate(&self, today: NaiveDate) -> Result<(), WorkflowError> {
        if !self.deleted {
            return Err(WorkflowError::conflict("Discount is already active"));
        }
        if self.end_date < today {
            return Err(WorkflowError::validation("Cannot reactivate expired discount"));
        }
        Ok(())
    }

    /// Money knocked off an invoice of the given total.
    pub fn amount_off(&self, total_amount: Decimal) -> Decimal {
        match self.kind {
            DiscountKind::Percentage => {
                money::round2(total_amount * self.value / Decimal::ONE_HUNDRED)
            }
            DiscountKind::Flat => money::round2(self.value),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountDraft {
    pub name: String,
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub usage_limit: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountPatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub kind: Option<DiscountKind>,
    pub value: Option<Decimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub usage_limit: Option<Option<u32>>,
}
