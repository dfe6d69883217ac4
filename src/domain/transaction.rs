//! Transaction domain entities.
//! Framework-agnostic representation of a marketplace purchase and the
//! records it touches when a payment lands.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Rejected,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Paid => "paid",
            TransactionStatus::Rejected => "rejected",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "paid" => Ok(TransactionStatus::Paid),
            "rejected" => Ok(TransactionStatus::Rejected),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

/// One attempted purchase of one product between a buyer and a seller.
///
/// `payment_id` is the idempotency anchor: it is written once, by the first
/// approval that wins the commit, and never overwritten afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub product_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    /// Minor currency units.
    pub amount: i64,
    pub status: TransactionStatus,
    pub payment_id: Option<String>,
    pub payment_status_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(product_id: Uuid, buyer_id: Uuid, seller_id: Uuid, amount: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_id,
            buyer_id,
            seller_id,
            amount,
            status: TransactionStatus::Pending,
            payment_id: None,
            payment_status_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// True when this exact payment has already been applied.
    pub fn is_paid_by(&self, payment_id: &str) -> bool {
        self.status == TransactionStatus::Paid && self.payment_id.as_deref() == Some(payment_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Available,
    Reserved,
    Sold,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Available => "available",
            ProductStatus::Reserved => "reserved",
            ProductStatus::Sold => "sold",
        }
    }
}

impl FromStr for ProductStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(ProductStatus::Available),
            "reserved" => Ok(ProductStatus::Reserved),
            "sold" => Ok(ProductStatus::Sold),
            other => Err(format!("unknown product status '{}'", other)),
        }
    }
}

/// Catalog product as seen by the reconciliation core. The impact factors
/// come from the product's category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub status: ProductStatus,
    pub co2_factor: BigDecimal,
    pub water_factor: BigDecimal,
}

/// Running environmental totals attributed to a user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImpactTotals {
    pub co2_saved: BigDecimal,
    pub water_saved: BigDecimal,
    pub items_count: i64,
}

impl ImpactTotals {
    pub fn apply(&mut self, delta: &ImpactDelta) {
        self.co2_saved = &self.co2_saved + &delta.co2;
        self.water_saved = &self.water_saved + &delta.water;
        self.items_count += delta.items;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: String,
    pub impact: ImpactTotals,
}

/// Contribution of one completed sale to a user's impact totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactDelta {
    pub co2: BigDecimal,
    pub water: BigDecimal,
    pub items: i64,
}

impl ImpactDelta {
    pub fn for_product(product: &Product) -> Self {
        Self {
            co2: product.co2_factor.clone(),
            water: product.water_factor.clone(),
            items: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPatch {
    pub status: TransactionStatus,
    pub payment_id: String,
    pub payment_status_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductPatch {
    pub status: ProductStatus,
}

/// Everything a first-time approval changes. A store must apply all of it
/// or none of it.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalCommit {
    pub transaction_id: Uuid,
    pub product_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub amount: i64,
    pub transaction_patch: TransactionPatch,
    pub product_patch: ProductPatch,
    pub buyer_delta: ImpactDelta,
    pub seller_delta: ImpactDelta,
}

/// Sum and count of a seller's transactions in one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aggregate {
    pub sum: i64,
    pub count: i64,
}
