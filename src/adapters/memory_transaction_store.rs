//! In-memory implementation of TransactionStore.
//!
//! A single async mutex guards every table, so each trait call is atomic with
//! respect to every other. Used by the test suite and for local runs without
//! Postgres.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    Aggregate, ApprovalCommit, Product, Transaction, TransactionStatus, UserProfile,
};
use crate::ports::{
    CommitOutcome, RejectionOutcome, StoreError, StoreResult, TransactionStore,
};

#[derive(Default)]
struct Tables {
    transactions: HashMap<Uuid, Transaction>,
    products: HashMap<Uuid, Product>,
    users: HashMap<Uuid, UserProfile>,
    /// payment_id -> transaction_id, one entry per applied approval.
    payment_audit: HashMap<String, Uuid>,
}

#[derive(Clone, Default)]
pub struct MemoryTransactionStore {
    tables: Arc<Mutex<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_transaction(&self, tx: Transaction) {
        self.tables.lock().await.transactions.insert(tx.id, tx);
    }

    pub async fn insert_product(&self, product: Product) {
        self.tables.lock().await.products.insert(product.id, product);
    }

    pub async fn insert_user(&self, user: UserProfile) {
        self.tables.lock().await.users.insert(user.id, user);
    }

    /// Number of approvals that have been applied.
    pub async fn applied_approvals(&self) -> usize {
        self.tables.lock().await.payment_audit.len()
    }

    /// Makes every subsequent call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        self.ensure_available()?;
        Ok(self.tables.lock().await.transactions.get(&id).cloned())
    }

    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        self.ensure_available()?;
        Ok(self.tables.lock().await.products.get(&id).cloned())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserProfile>> {
        self.ensure_available()?;
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn commit_approval(&self, commit: &ApprovalCommit) -> StoreResult<CommitOutcome> {
        self.ensure_available()?;
        let mut tables = self.tables.lock().await;

        let current = tables
            .transactions
            .get(&commit.transaction_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(commit.transaction_id.to_string()))?;

        if current.is_paid_by(&commit.transaction_patch.payment_id) {
            return Ok(CommitOutcome::AlreadyApplied(current));
        }
        if current.status != TransactionStatus::Pending || current.payment_id.is_some() {
            return Ok(CommitOutcome::Conflict(current));
        }

        // Validate every row before touching any of them.
        if let Some(owner) = tables.payment_audit.get(&commit.transaction_patch.payment_id) {
            return Err(StoreError::Duplicate(format!(
                "payment {} is already applied to transaction {}",
                commit.transaction_patch.payment_id, owner
            )));
        }
        for user_id in [commit.buyer_id, commit.seller_id] {
            if !tables.users.contains_key(&user_id) {
                return Err(StoreError::NotFound(format!("user {}", user_id)));
            }
        }
        if !tables.products.contains_key(&commit.product_id) {
            return Err(StoreError::NotFound(format!("product {}", commit.product_id)));
        }

        let mut updated = current;
        updated.status = commit.transaction_patch.status;
        updated.payment_id = Some(commit.transaction_patch.payment_id.clone());
        updated.payment_status_detail = commit.transaction_patch.payment_status_detail.clone();
        updated.updated_at = Utc::now();
        tables.transactions.insert(updated.id, updated.clone());

        if let Some(product) = tables.products.get_mut(&commit.product_id) {
            product.status = commit.product_patch.status;
        }
        if let Some(buyer) = tables.users.get_mut(&commit.buyer_id) {
            buyer.impact.apply(&commit.buyer_delta);
        }
        if let Some(seller) = tables.users.get_mut(&commit.seller_id) {
            seller.impact.apply(&commit.seller_delta);
        }
        tables
            .payment_audit
            .insert(commit.transaction_patch.payment_id.clone(), updated.id);

        Ok(CommitOutcome::Applied(updated))
    }

    async fn record_rejection(
        &self,
        transaction_id: Uuid,
        status_detail: Option<&str>,
    ) -> StoreResult<RejectionOutcome> {
        self.ensure_available()?;
        let mut tables = self.tables.lock().await;

        let tx = tables
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))?;

        match tx.status {
            TransactionStatus::Pending | TransactionStatus::Rejected => {
                tx.status = TransactionStatus::Rejected;
                tx.payment_status_detail = status_detail.map(str::to_string);
                tx.updated_at = Utc::now();
                Ok(RejectionOutcome::Recorded(tx.clone()))
            }
            TransactionStatus::Paid | TransactionStatus::Cancelled => {
                Ok(RejectionOutcome::Unchanged(tx.clone()))
            }
        }
    }

    async fn aggregate(&self, seller_id: Uuid, status: TransactionStatus) -> StoreResult<Aggregate> {
        self.ensure_available()?;
        let tables = self.tables.lock().await;

        tables
            .transactions
            .values()
            .filter(|tx| tx.seller_id == seller_id && tx.status == status)
            .try_fold(Aggregate::default(), |acc, tx| {
                Some(Aggregate {
                    sum: acc.sum.checked_add(tx.amount)?,
                    count: acc.count.checked_add(1)?,
                })
            })
            .ok_or_else(|| StoreError::Corrupt(format!("amount total overflows for seller {}", seller_id)))
    }
}
