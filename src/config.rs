use anyhow::Context;
use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::time::Duration;

use crate::secrets::SecretsManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub gateway_base_url: String,
    pub gateway_access_token: String,
    pub gateway_timeout_secs: u64,
    pub gateway_cb_failure_threshold: u32,
    pub gateway_cb_reset_secs: u64,
    /// `None` disables webhook signature verification.
    pub webhook_secret: Option<String>,
    pub notification_service_url: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub log_format: LogFormat,
    pub log_request_body: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("SERVER_PORT must be a port number")?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            gateway_base_url: env::var("GATEWAY_BASE_URL").context("GATEWAY_BASE_URL is required")?,
            gateway_access_token: env::var("GATEWAY_ACCESS_TOKEN").unwrap_or_default(),
            gateway_timeout_secs: parse_or("GATEWAY_TIMEOUT_SECS", 10)?,
            gateway_cb_failure_threshold: parse_or("GATEWAY_CB_FAILURE_THRESHOLD", 3)?,
            gateway_cb_reset_secs: parse_or("GATEWAY_CB_RESET_SECS", 60)?,
            webhook_secret: non_empty(env::var("WEBHOOK_SECRET").ok()),
            notification_service_url: non_empty(env::var("NOTIFICATION_SERVICE_URL").ok()),
            cors_allowed_origins: parse_origins(
                &env::var("CORS_ALLOWED_ORIGINS").unwrap_or_default(),
            ),
            log_format: parse_log_format(&env::var("LOG_FORMAT").unwrap_or_default())?,
            log_request_body: parse_or("LOG_REQUEST_BODY", false)?,
        })
    }

    /// Replaces the webhook secret and gateway token with the values held in
    /// Vault.
    pub async fn apply_secrets(&mut self, secrets: &SecretsManager) -> anyhow::Result<()> {
        self.webhook_secret = non_empty(Some(secrets.get_webhook_secret().await?));
        self.gateway_access_token = secrets.get_gateway_access_token().await?;
        Ok(())
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_port", &self.server_port)
            .field("gateway_base_url", &self.gateway_base_url)
            .field("gateway_timeout_secs", &self.gateway_timeout_secs)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("notification_service_url", &self.notification_service_url)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("log_format", &self.log_format)
            .field("log_request_body", &self.log_request_body)
            .finish_non_exhaustive()
    }
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value", key)),
        _ => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_log_format(raw: &str) -> anyhow::Result<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
    }
}
