use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::TransactionStatus;
use crate::ports::{StoreResult, TransactionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Earnings {
    pub total_earnings: i64,
    pub total_sales: i64,
    pub pending_earnings: i64,
    pub pending_sales: i64,
}

pub struct EarningsAggregator {
    store: Arc<dyn TransactionStore>,
}

impl EarningsAggregator {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// Paid and pending totals for a seller. Sellers without sales get zeros.
    pub async fn get_earnings(&self, seller_id: Uuid) -> StoreResult<Earnings> {
        let (paid, pending) = tokio::try_join!(
            self.store.aggregate(seller_id, TransactionStatus::Paid),
            self.store.aggregate(seller_id, TransactionStatus::Pending),
        )?;

        Ok(Earnings {
            total_earnings: paid.sum,
            total_sales: paid.count,
            pending_earnings: pending.sum,
            pending_sales: pending.count,
        })
    }
}
