pub mod earnings;
pub mod reconciliation;
pub mod signature;
pub mod status;

pub use earnings::{Earnings, EarningsAggregator};
pub use reconciliation::{ReconcileError, ReconcileOutcome, ReconciliationEngine, WebhookReply};
pub use signature::SignatureVerifier;
pub use status::{StatusError, StatusQuery, StatusView};
