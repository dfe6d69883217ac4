use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::gateway::HttpPaymentGateway;
use crate::notifications::{HttpNotificationDispatcher, LogNotificationDispatcher};
use crate::ports::NotificationDispatcher;

pub fn build_gateway(config: &Config) -> HttpPaymentGateway {
    HttpPaymentGateway::with_circuit_breaker(
        config.gateway_base_url.clone(),
        config.gateway_access_token.clone(),
        config.gateway_timeout(),
        config.gateway_cb_failure_threshold,
        config.gateway_cb_reset_secs,
    )
}

/// Notifications go to the notification service when one is configured and
/// to the log otherwise.
pub fn build_notifier(config: &Config) -> Arc<dyn NotificationDispatcher> {
    match &config.notification_service_url {
        Some(url) => Arc::new(HttpNotificationDispatcher::new(url.clone())),
        None => {
            tracing::info!("NOTIFICATION_SERVICE_URL not set, notifications will only be logged");
            Arc::new(LogNotificationDispatcher)
        }
    }
}

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub gateway: bool,
    pub signature_enforced: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Disabled signature verification is reported but does not fail the
    /// validation.
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.gateway
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Gateway Reachability:  {}", status(self.gateway));
        println!(
            "Webhook Signatures:    {}",
            if self.signature_enforced {
                "enforced"
            } else {
                "DISABLED (WEBHOOK_SECRET not set)"
            }
        );

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  - {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "PASS" } else { "FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "FAIL"
    }
}

pub async fn validate_environment(config: &Config, pool: Option<&PgPool>) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        gateway: true,
        signature_enforced: config.webhook_secret.is_some(),
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {:#}", e));
    }

    match pool {
        Some(pool) => {
            if let Err(e) = validate_database(pool).await {
                report.database = false;
                report.errors.push(format!("Database: {:#}", e));
            }
        }
        None => {
            report.database = false;
            report.errors.push("Database: could not connect".to_string());
        }
    }

    if let Err(e) = validate_gateway(&config.gateway_base_url).await {
        report.gateway = false;
        report.errors.push(format!("Gateway: {:#}", e));
    }

    report
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.gateway_access_token.is_empty() {
        anyhow::bail!("GATEWAY_ACCESS_TOKEN is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.gateway_timeout_secs == 0 {
        anyhow::bail!("GATEWAY_TIMEOUT_SECS must be greater than 0");
    }

    url::Url::parse(&config.gateway_base_url).context("GATEWAY_BASE_URL is not a valid URL")?;
    if let Some(notification_url) = &config.notification_service_url {
        url::Url::parse(notification_url)
            .context("NOTIFICATION_SERVICE_URL is not a valid URL")?;
    }

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

/// Any HTTP answer counts as reachable; the base URL itself is not a payment.
async fn validate_gateway(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(base_url)
        .send()
        .await
        .context("Failed to connect to the payment gateway")?;

    if response.status().is_server_error() {
        anyhow::bail!("Gateway returned status: {}", response.status());
    }

    Ok(())
}
