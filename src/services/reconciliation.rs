//! Payment reconciliation.
//!
//! Turns a verified gateway notification into at most one application of the
//! approval side-effect set:
//!
//! 1. Ignore anything that is not a payment event.
//! 2. Re-fetch the payment from the gateway; the notification body is never
//!    trusted for the status.
//! 3. Resolve the transaction through the payment's external reference.
//! 4. Approved: skip if this payment was already applied, otherwise commit
//!    transaction, product and both impact aggregates atomically, then notify
//!    the seller on a best-effort basis.
//! 5. Rejected/cancelled: record the rejection on the transaction only.
//! 6. Anything else: wait for the next notification.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    ApprovalCommit, GatewayEvent, ImpactDelta, PaymentDetail, PaymentStatus, Product,
    ProductPatch, ProductStatus, Transaction, TransactionPatch, TransactionStatus,
};
use crate::ports::{
    CommitOutcome, GatewayError, NotificationDispatcher, PaymentGateway, RejectionOutcome,
    StoreError, TransactionStore,
};

pub const PAYMENT_RECEIVED_EVENT: &str = "payment_received";
const UNKNOWN_BUYER_NAME: &str = "A buyer";

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Not a payment event; nothing was fetched or written.
    Ignored,
    /// First-time approval; every side effect was committed.
    Approved(Transaction),
    /// The payment had already been applied.
    AlreadyProcessed(Transaction),
    /// The rejection was recorded on the transaction.
    Rejected(Transaction),
    /// A rejection arrived for a transaction that is no longer open.
    RejectionIgnored(Transaction),
    /// Non-terminal payment status.
    Waiting { payment_id: String, status: PaymentStatus },
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Payment lookup failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Transaction not found")]
    TransactionNotFound { reference: Option<String> },

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Transaction {transaction_id} is {status} and cannot accept payment {payment_id}")]
    InvalidTransition {
        transaction_id: Uuid,
        status: TransactionStatus,
        payment_id: String,
    },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Failures a redelivery can fix.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Gateway(e) => e.is_transient(),
            ReconcileError::Store(StoreError::Database(_)) => true,
            _ => false,
        }
    }
}

/// Webhook response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip)]
    pub retryable: bool,
}

impl WebhookReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            retryable: false,
        }
    }

    pub fn failed(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            retryable,
        }
    }
}

pub struct ReconciliationEngine {
    store: Arc<dyn TransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
        }
    }

    /// Handles one notification and folds the result into the webhook reply.
    pub async fn handle_webhook(&self, event: &GatewayEvent) -> WebhookReply {
        match self.reconcile(event).await {
            Ok(_) => WebhookReply::ok(),
            Err(err) => {
                if err.is_transient() {
                    tracing::warn!(
                        event_id = %event.event_id,
                        data_id = %event.data_id,
                        error = %err,
                        "Reconciliation failed, awaiting redelivery"
                    );
                } else {
                    tracing::error!(
                        event_id = %event.event_id,
                        data_id = %event.data_id,
                        error = %err,
                        "Reconciliation failed"
                    );
                }
                WebhookReply::failed(err.to_string(), err.is_transient())
            }
        }
    }

    #[tracing::instrument(
        name = "reconcile",
        skip_all,
        fields(event_id = %event.event_id, data_id = %event.data_id)
    )]
    pub async fn reconcile(&self, event: &GatewayEvent) -> Result<ReconcileOutcome, ReconcileError> {
        if !event.is_payment() {
            tracing::debug!(event_type = %event.event_type, "Ignoring non-payment event");
            return Ok(ReconcileOutcome::Ignored);
        }

        let detail = self.gateway.fetch_payment(&event.data_id).await?;
        let tx = self.resolve_transaction(&detail).await?;

        match &detail.status {
            PaymentStatus::Approved => self.apply_approval(tx, &detail).await,
            status if status.is_terminal_failure() => self.apply_rejection(tx, &detail).await,
            status => {
                tracing::debug!(
                    transaction_id = %tx.id,
                    payment_id = %detail.payment_id,
                    status = status.as_str(),
                    "Payment not settled yet"
                );
                Ok(ReconcileOutcome::Waiting {
                    payment_id: detail.payment_id.clone(),
                    status: status.clone(),
                })
            }
        }
    }

    async fn resolve_transaction(&self, detail: &PaymentDetail) -> Result<Transaction, ReconcileError> {
        let reference = detail.external_reference.as_deref().map(str::trim);
        let found = match reference.and_then(|r| Uuid::parse_str(r).ok()) {
            Some(id) => self.store.get(id).await?,
            None => None,
        };

        found.ok_or_else(|| {
            tracing::error!(
                payment_id = %detail.payment_id,
                external_reference = ?reference,
                "Payment references no known transaction"
            );
            ReconcileError::TransactionNotFound {
                reference: reference.map(str::to_string),
            }
        })
    }

    async fn apply_approval(
        &self,
        tx: Transaction,
        detail: &PaymentDetail,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if tx.is_paid_by(&detail.payment_id) {
            tracing::debug!(
                transaction_id = %tx.id,
                payment_id = %detail.payment_id,
                "Payment already applied"
            );
            return Ok(ReconcileOutcome::AlreadyProcessed(tx));
        }
        if tx.status != TransactionStatus::Pending || tx.payment_id.is_some() {
            return Err(invalid_transition(&tx, detail));
        }
        if let Some(paid) = detail.transaction_amount.filter(|paid| *paid != tx.amount) {
            tracing::warn!(
                transaction_id = %tx.id,
                payment_id = %detail.payment_id,
                expected = tx.amount,
                paid,
                "Approved amount differs from transaction amount"
            );
        }

        let product = self
            .store
            .get_product(tx.product_id)
            .await?
            .ok_or(ReconcileError::ProductNotFound(tx.product_id))?;
        let delta = ImpactDelta::for_product(&product);

        let commit = ApprovalCommit {
            transaction_id: tx.id,
            product_id: tx.product_id,
            buyer_id: tx.buyer_id,
            seller_id: tx.seller_id,
            amount: tx.amount,
            transaction_patch: TransactionPatch {
                status: TransactionStatus::Paid,
                payment_id: detail.payment_id.clone(),
                payment_status_detail: detail.status_detail.clone(),
            },
            product_patch: ProductPatch {
                status: ProductStatus::Sold,
            },
            buyer_delta: delta.clone(),
            seller_delta: delta,
        };

        match self.store.commit_approval(&commit).await? {
            CommitOutcome::Applied(updated) => {
                tracing::info!(
                    transaction_id = %updated.id,
                    payment_id = %detail.payment_id,
                    amount = updated.amount,
                    "Payment approved and applied"
                );
                self.notify_seller(&updated, &product).await;
                Ok(ReconcileOutcome::Approved(updated))
            }
            CommitOutcome::AlreadyApplied(current) => {
                tracing::debug!(
                    transaction_id = %current.id,
                    payment_id = %detail.payment_id,
                    "Payment applied by a concurrent delivery"
                );
                Ok(ReconcileOutcome::AlreadyProcessed(current))
            }
            CommitOutcome::Conflict(current) => Err(invalid_transition(&current, detail)),
        }
    }

    async fn apply_rejection(
        &self,
        tx: Transaction,
        detail: &PaymentDetail,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match self
            .store
            .record_rejection(tx.id, detail.status_detail.as_deref())
            .await?
        {
            RejectionOutcome::Recorded(updated) => {
                tracing::info!(
                    transaction_id = %updated.id,
                    payment_id = %detail.payment_id,
                    status_detail = ?detail.status_detail,
                    "Payment rejected"
                );
                Ok(ReconcileOutcome::Rejected(updated))
            }
            RejectionOutcome::Unchanged(current) => {
                tracing::info!(
                    transaction_id = %current.id,
                    payment_id = %detail.payment_id,
                    status = %current.status,
                    "Rejection ignored for closed transaction"
                );
                Ok(ReconcileOutcome::RejectionIgnored(current))
            }
        }
    }

    /// Best effort. Failures are logged and never undo the committed payment.
    async fn notify_seller(&self, tx: &Transaction, product: &Product) {
        let payload = json!({
            "transactionId": tx.id,
            "amount": tx.amount,
        });
        if let Err(e) = self
            .notifier
            .notify_in_app(tx.seller_id, PAYMENT_RECEIVED_EVENT, payload)
            .await
        {
            tracing::warn!(transaction_id = %tx.id, error = %e, "In-app notification failed");
        }

        let buyer_name = match self.store.get_user(tx.buyer_id).await {
            Ok(Some(buyer)) => buyer.display_name,
            Ok(None) => UNKNOWN_BUYER_NAME.to_string(),
            Err(e) => {
                tracing::warn!(transaction_id = %tx.id, error = %e, "Could not load buyer for notification");
                UNKNOWN_BUYER_NAME.to_string()
            }
        };

        if let Err(e) = self
            .notifier
            .notify_push(tx.seller_id, &buyer_name, &product.title, tx.id, tx.amount)
            .await
        {
            tracing::warn!(transaction_id = %tx.id, error = %e, "Push notification failed");
        }
    }
}

fn invalid_transition(tx: &Transaction, detail: &PaymentDetail) -> ReconcileError {
    ReconcileError::InvalidTransition {
        transaction_id: tx.id,
        status: tx.status,
        payment_id: detail.payment_id.clone(),
    }
}
