//! Postgres implementation of TransactionStore.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    Aggregate, ApprovalCommit, ImpactDelta, ImpactTotals, Product, Transaction, TransactionStatus,
    UserProfile,
};
use crate::ports::{
    CommitOutcome, RejectionOutcome, StoreError, StoreResult, TransactionStore,
};

const TRANSACTION_COLUMNS: &str = "id, product_id, buyer_id, seller_id, amount, status, \
     payment_id, payment_status_detail, created_at, updated_at";

/// Postgres-backed transaction store.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT p.id, p.seller_id, p.title, p.status, c.co2_factor, c.water_factor
            FROM products p
            JOIN categories c ON c.id = p.category_id
            WHERE p.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProductRow::into_domain).transpose()
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserProfile>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, display_name, co2_saved, water_saved, items_count FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_domain))
    }

    async fn commit_approval(&self, commit: &ApprovalCommit) -> StoreResult<CommitOutcome> {
        let mut db_tx = self.pool.begin().await?;

        // Row lock: a concurrent delivery for the same transaction waits here
        // and then sees the committed state.
        let locked = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(commit.transaction_id)
        .fetch_optional(&mut *db_tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(commit.transaction_id.to_string()))?
        .into_domain()?;

        if locked.is_paid_by(&commit.transaction_patch.payment_id) {
            db_tx.rollback().await?;
            return Ok(CommitOutcome::AlreadyApplied(locked));
        }
        if locked.status != TransactionStatus::Pending || locked.payment_id.is_some() {
            db_tx.rollback().await?;
            return Ok(CommitOutcome::Conflict(locked));
        }

        let updated = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            UPDATE transactions
            SET status = $2, payment_id = $3, payment_status_detail = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'pending' AND payment_id IS NULL
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(commit.transaction_id)
        .bind(commit.transaction_patch.status.as_str())
        .bind(&commit.transaction_patch.payment_id)
        .bind(&commit.transaction_patch.payment_status_detail)
        .fetch_one(&mut *db_tx)
        .await
        .map_err(|e| duplicate_payment(e, &commit.transaction_patch.payment_id))?
        .into_domain()?;

        let product = sqlx::query("UPDATE products SET status = $2 WHERE id = $1")
            .bind(commit.product_id)
            .bind(commit.product_patch.status.as_str())
            .execute(&mut *db_tx)
            .await?;
        if product.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("product {}", commit.product_id)));
        }

        for (user_id, delta) in [
            (commit.buyer_id, &commit.buyer_delta),
            (commit.seller_id, &commit.seller_delta),
        ] {
            apply_impact(&mut db_tx, user_id, delta).await?;
        }

        sqlx::query("INSERT INTO payment_audit (payment_id, transaction_id, amount) VALUES ($1, $2, $3)")
            .bind(&commit.transaction_patch.payment_id)
            .bind(commit.transaction_id)
            .bind(commit.amount)
            .execute(&mut *db_tx)
            .await
            .map_err(|e| duplicate_payment(e, &commit.transaction_patch.payment_id))?;

        db_tx.commit().await?;
        Ok(CommitOutcome::Applied(updated))
    }

    async fn record_rejection(
        &self,
        transaction_id: Uuid,
        status_detail: Option<&str>,
    ) -> StoreResult<RejectionOutcome> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            UPDATE transactions
            SET status = 'rejected', payment_status_detail = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'rejected')
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(status_detail)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(RejectionOutcome::Recorded(row.into_domain()?)),
            None => self
                .get(transaction_id)
                .await?
                .map(RejectionOutcome::Unchanged)
                .ok_or_else(|| StoreError::NotFound(transaction_id.to_string())),
        }
    }

    async fn aggregate(&self, seller_id: Uuid, status: TransactionStatus) -> StoreResult<Aggregate> {
        let (sum, count) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT, COUNT(*)
            FROM transactions
            WHERE seller_id = $1 AND status = $2
            "#,
        )
        .bind(seller_id)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(Aggregate { sum, count })
    }
}

/// A payment id can only ever be applied to one transaction. Postgres reports
/// a second use as a unique violation (23505).
fn duplicate_payment(err: sqlx::Error, payment_id: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Duplicate(
            format!("payment {} is already applied to another transaction", payment_id),
        ),
        _ => StoreError::Database(err),
    }
}

async fn apply_impact(
    db_tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    delta: &ImpactDelta,
) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET co2_saved = co2_saved + $2,
            water_saved = water_saved + $3,
            items_count = items_count + $4
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(&delta.co2)
    .bind(&delta.water)
    .bind(delta.items)
    .execute(&mut **db_tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("user {}", user_id)));
    }
    Ok(())
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    product_id: Uuid,
    buyer_id: Uuid,
    seller_id: Uuid,
    amount: i64,
    status: String,
    payment_id: Option<String>,
    payment_status_detail: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> StoreResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            product_id: self.product_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            amount: self.amount,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            payment_id: self.payment_id,
            payment_status_detail: self.payment_status_detail,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    seller_id: Uuid,
    title: String,
    status: String,
    co2_factor: BigDecimal,
    water_factor: BigDecimal,
}

impl ProductRow {
    fn into_domain(self) -> StoreResult<Product> {
        Ok(Product {
            id: self.id,
            seller_id: self.seller_id,
            title: self.title,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            co2_factor: self.co2_factor,
            water_factor: self.water_factor,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    display_name: String,
    co2_saved: BigDecimal,
    water_saved: BigDecimal,
    items_count: i64,
}

impl UserRow {
    fn into_domain(self) -> UserProfile {
        UserProfile {
            id: self.id,
            display_name: self.display_name,
            impact: ImpactTotals {
                co2_saved: self.co2_saved,
                water_saved: self.water_saved,
                items_count: self.items_count,
            },
        }
    }
}
