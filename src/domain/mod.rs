pub mod payment;
pub mod transaction;

pub use payment::{GatewayEvent, PaymentDetail, PaymentStatus, PAYMENT_EVENT_TYPE};
pub use transaction::{
    Aggregate, ApprovalCommit, ImpactDelta, ImpactTotals, Product, ProductPatch, ProductStatus,
    Transaction, TransactionPatch, TransactionStatus, UserProfile,
};
