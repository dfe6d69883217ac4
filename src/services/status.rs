use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus};
use crate::ports::{PaymentGateway, StoreError, TransactionStore};

pub const WAITING_FOR_PAYMENT: &str = "Waiting for payment";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: String,
    pub status_detail: Option<String>,
}

impl StatusView {
    fn waiting() -> Self {
        Self {
            status: TransactionStatus::Pending.as_str().to_string(),
            status_detail: Some(WAITING_FOR_PAYMENT.to_string()),
        }
    }

    fn local(tx: &Transaction) -> Self {
        Self {
            status: tx.status.as_str().to_string(),
            status_detail: tx.payment_status_detail.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Transaction {0} not found")]
    NotFound(Uuid),

    #[error("Requester is not a participant of transaction {0}")]
    Unauthorized(Uuid),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Read-only status lookups for a transaction's buyer or seller.
pub struct StatusQuery {
    store: Arc<dyn TransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl StatusQuery {
    pub fn new(store: Arc<dyn TransactionStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn check_status(
        &self,
        requester_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<StatusView, StatusError> {
        let tx = self
            .store
            .get(transaction_id)
            .await?
            .ok_or(StatusError::NotFound(transaction_id))?;

        if !tx.is_participant(requester_id) {
            return Err(StatusError::Unauthorized(transaction_id));
        }

        let Some(payment_id) = tx.payment_id.as_deref() else {
            // No payment applied yet: answer locally, never from the gateway.
            return Ok(if tx.status == TransactionStatus::Pending {
                StatusView::waiting()
            } else {
                StatusView::local(&tx)
            });
        };

        // Answers always use transaction status words; the gateway only
        // refreshes them.
        match self.gateway.fetch_payment(payment_id).await {
            Ok(detail) => Ok(StatusView {
                status: detail
                    .status
                    .transaction_status()
                    .unwrap_or(tx.status)
                    .as_str()
                    .to_string(),
                status_detail: detail.status_detail.or(tx.payment_status_detail),
            }),
            Err(e) => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    payment_id,
                    error = %e,
                    "Gateway status lookup failed, serving stored status"
                );
                Ok(StatusView::local(&tx))
            }
        }
    }
}
