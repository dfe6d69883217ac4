use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::PostgresTransactionStore;
use crate::config::Config;
use crate::domain::{GatewayEvent, PAYMENT_EVENT_TYPE};
use crate::ports::TransactionStore;
use crate::services::{EarningsAggregator, ReconcileOutcome, ReconciliationEngine};

#[derive(Parser)]
#[command(name = "reconcile-core")]
#[command(about = "Marketplace payment reconciliation service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Transaction inspection and repair
    #[command(subcommand)]
    Tx(TxCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Validate configuration and dependencies
    Config,

    /// Show a seller's earnings
    Earnings {
        #[arg(value_name = "SELLER_ID")]
        seller_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Print a transaction
    Show {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },

    /// Re-run reconciliation for a gateway payment id, skipping the
    /// signature check
    Reconcile {
        #[arg(value_name = "PAYMENT_ID")]
        payment_id: String,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

async fn connect_store(config: &Config) -> anyhow::Result<PostgresTransactionStore> {
    let pool = crate::db::create_pool(config).await?;
    Ok(PostgresTransactionStore::new(pool))
}

pub async fn handle_tx_show(config: &Config, tx_id: Uuid) -> anyhow::Result<()> {
    let store = connect_store(config).await?;
    let Some(tx) = store.get(tx_id).await? else {
        anyhow::bail!("Transaction {} not found", tx_id)
    };

    println!("Transaction {}", tx.id);
    println!("  Status:      {}", tx.status);
    println!("  Amount:      {}", tx.amount);
    println!("  Product:     {}", tx.product_id);
    println!("  Buyer:       {}", tx.buyer_id);
    println!("  Seller:      {}", tx.seller_id);
    println!("  Payment ID:  {}", tx.payment_id.as_deref().unwrap_or("-"));
    println!(
        "  Detail:      {}",
        tx.payment_status_detail.as_deref().unwrap_or("-")
    );
    println!("  Updated at:  {}", tx.updated_at);

    Ok(())
}

pub async fn handle_tx_reconcile(config: &Config, payment_id: &str) -> anyhow::Result<()> {
    let store = connect_store(config).await?;
    let engine = ReconciliationEngine::new(
        Arc::new(store),
        Arc::new(crate::startup::build_gateway(config)),
        crate::startup::build_notifier(config),
    );

    let event = GatewayEvent {
        event_id: format!("cli-{}", Uuid::new_v4()),
        event_type: PAYMENT_EVENT_TYPE.to_string(),
        data_id: payment_id.to_string(),
        signature_header: None,
        request_id: None,
        received_at: Utc::now(),
    };

    tracing::info!(payment_id = %payment_id, "Manual reconciliation requested");
    match engine.reconcile(&event).await? {
        ReconcileOutcome::Approved(tx) => println!("✓ Transaction {} marked as paid", tx.id),
        ReconcileOutcome::AlreadyProcessed(tx) => {
            println!("Transaction {} was already paid by this payment", tx.id)
        }
        ReconcileOutcome::Rejected(tx) => println!("✓ Rejection recorded on transaction {}", tx.id),
        ReconcileOutcome::RejectionIgnored(tx) => {
            println!("Transaction {} is {}, rejection ignored", tx.id, tx.status)
        }
        ReconcileOutcome::Waiting { payment_id, status } => {
            println!("Payment {} is still {}", payment_id, status.as_str())
        }
        ReconcileOutcome::Ignored => println!("Nothing to do"),
    }

    Ok(())
}

pub async fn handle_earnings(config: &Config, seller_id: Uuid) -> anyhow::Result<()> {
    let store = connect_store(config).await?;
    let earnings = EarningsAggregator::new(Arc::new(store))
        .get_earnings(seller_id)
        .await?;

    println!("Earnings for seller {}", seller_id);
    println!("  Paid:    {} ({} sales)", earnings.total_earnings, earnings.total_sales);
    println!(
        "  Pending: {} ({} sales)",
        earnings.pending_earnings, earnings.pending_sales
    );

    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Gateway URL: {}", config.gateway_base_url);

    let pool = match crate::db::create_pool(config).await {
        Ok(pool) => Some(pool),
        Err(e) => {
            tracing::warn!(error = %e, "Database connection failed during validation");
            None
        }
    };
    let report = crate::startup::validate_environment(config, pool.as_ref()).await;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration validation failed");
    }
    Ok(())
}

fn mask_password(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("****")).is_ok() {
                parsed.to_string()
            } else {
                url.to_string()
            }
        }
        _ => url.to_string(),
    }
}
