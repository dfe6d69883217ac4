//! Ports: the seams between the reconciliation core and its collaborators.
//! Adapters live in `crate::adapters`, `crate::gateway` and
//! `crate::notifications`.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Aggregate, ApprovalCommit, PaymentDetail, Product, Transaction, TransactionStatus, UserProfile,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A uniqueness rule was violated; retrying will not help.
    #[error("Duplicate: {0}")]
    Duplicate(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an atomic approval commit.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// This call flipped the transaction to paid and applied every side effect.
    Applied(Transaction),
    /// The same payment was already applied, typically by a concurrent delivery.
    AlreadyApplied(Transaction),
    /// The transaction was no longer pending; nothing was written.
    Conflict(Transaction),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectionOutcome {
    Recorded(Transaction),
    Unchanged(Transaction),
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Transaction>>;

    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>>;

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserProfile>>;

    /// Applies the whole approval or nothing. Implementations must re-check
    /// that the transaction is still pending while holding a lock on it.
    async fn commit_approval(&self, commit: &ApprovalCommit) -> StoreResult<CommitOutcome>;

    /// Marks a pending (or already rejected) transaction as rejected and
    /// stores the gateway detail. Any other status is left untouched.
    async fn record_rejection(
        &self,
        transaction_id: Uuid,
        status_detail: Option<&str>,
    ) -> StoreResult<RejectionOutcome>;

    async fn aggregate(&self, seller_id: Uuid, status: TransactionStatus) -> StoreResult<Aggregate>;
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Payment not found: {0}")]
    NotFound(String),

    #[error("Invalid response from payment gateway: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Failures worth a redelivery from the gateway.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentDetail, GatewayError>;
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify_in_app(
        &self,
        user_id: Uuid,
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError>;

    async fn notify_push(
        &self,
        user_id: Uuid,
        buyer_name: &str,
        product_title: &str,
        transaction_id: Uuid,
        amount: i64,
    ) -> Result<(), NotifyError>;
}
