//! Payment-gateway values. None of these are persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TransactionStatus;

pub const PAYMENT_EVENT_TYPE: &str = "payment";

/// An inbound webhook notification plus the headers needed to authenticate it.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub event_id: String,
    pub event_type: String,
    /// Gateway-side payment identifier. Only a pointer; the status is always
    /// re-fetched.
    pub data_id: String,
    pub signature_header: Option<String>,
    pub request_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl GatewayEvent {
    pub fn is_payment(&self) -> bool {
        self.event_type == PAYMENT_EVENT_TYPE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentStatus {
    Approved,
    Rejected,
    Cancelled,
    Pending,
    InProcess,
    Other(String),
}

impl PaymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Pending => "pending",
            PaymentStatus::InProcess => "in_process",
            PaymentStatus::Other(s) => s,
        }
    }

    /// Terminal outcomes other than approval.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, PaymentStatus::Rejected | PaymentStatus::Cancelled)
    }

    /// The transaction status this payment state corresponds to. `None` for
    /// gateway states with no local equivalent (refunds, chargebacks).
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        match self {
            PaymentStatus::Approved => Some(TransactionStatus::Paid),
            PaymentStatus::Rejected => Some(TransactionStatus::Rejected),
            PaymentStatus::Cancelled => Some(TransactionStatus::Cancelled),
            PaymentStatus::Pending | PaymentStatus::InProcess => Some(TransactionStatus::Pending),
            PaymentStatus::Other(_) => None,
        }
    }
}

impl From<String> for PaymentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "approved" => PaymentStatus::Approved,
            "rejected" => PaymentStatus::Rejected,
            "cancelled" => PaymentStatus::Cancelled,
            "pending" => PaymentStatus::Pending,
            "in_process" => PaymentStatus::InProcess,
            _ => PaymentStatus::Other(s),
        }
    }
}

impl From<PaymentStatus> for String {
    fn from(status: PaymentStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Authoritative payment state as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetail {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub status_detail: Option<String>,
    /// Set to the transaction id at checkout time.
    pub external_reference: Option<String>,
    /// Minor currency units.
    pub transaction_amount: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_from_wire() {
        assert_eq!(PaymentStatus::from("approved".to_string()), PaymentStatus::Approved);
        assert_eq!(PaymentStatus::from("in_process".to_string()), PaymentStatus::InProcess);
        assert_eq!(
            PaymentStatus::from("charged_back".to_string()),
            PaymentStatus::Other("charged_back".to_string())
        );
    }

    #[test]
    fn test_terminal_failures() {
        assert!(PaymentStatus::Rejected.is_terminal_failure());
        assert!(PaymentStatus::Cancelled.is_terminal_failure());
        assert!(!PaymentStatus::Approved.is_terminal_failure());
        assert!(!PaymentStatus::InProcess.is_terminal_failure());
    }

    #[test]
    fn test_transaction_status_mapping() {
        assert_eq!(
            PaymentStatus::Approved.transaction_status(),
            Some(TransactionStatus::Paid)
        );
        assert_eq!(
            PaymentStatus::InProcess.transaction_status(),
            Some(TransactionStatus::Pending)
        );
        assert_eq!(
            PaymentStatus::Other("refunded".to_string()).transaction_status(),
            None
        );
    }
}
