use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::gateway::HttpPaymentGateway;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl Into<String>) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.into(),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

pub struct PostgresChecker {
    pool: sqlx::PgPool,
}

impl PostgresChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyChecker for PostgresChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e.to_string()),
        }
    }
}

/// Reports the gateway client's circuit breaker; no request is sent.
pub struct GatewayChecker {
    client: HttpPaymentGateway,
}

impl GatewayChecker {
    pub fn new(client: HttpPaymentGateway) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DependencyChecker for GatewayChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.client.circuit_state().as_str() {
            "closed" => DependencyStatus::healthy(start),
            state => DependencyStatus::unhealthy(format!("circuit breaker {}", state)),
        }
    }
}

struct RegisteredCheck {
    name: String,
    critical: bool,
    checker: Arc<dyn DependencyChecker>,
}

/// The dependencies reported on `/health`. A failing critical dependency
/// makes the service unhealthy; any other failure only degrades it.
pub struct HealthRegistry {
    checks: Vec<RegisteredCheck>,
    start_time: Instant,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn register(
        mut self,
        name: &str,
        critical: bool,
        checker: impl DependencyChecker + 'static,
    ) -> Self {
        self.checks.push(RegisteredCheck {
            name: name.to_string(),
            critical,
            checker: Arc::new(checker),
        });
        self
    }

    pub async fn check_health(&self) -> HealthResponse {
        let mut dependencies = HashMap::new();
        let mut critical = Vec::new();

        for check in &self.checks {
            let status = timeout(CHECK_TIMEOUT, check.checker.check())
                .await
                .unwrap_or_else(|_| DependencyStatus::unhealthy("timeout"));
            if check.critical {
                critical.push(check.name.clone());
            }
            dependencies.insert(check.name.clone(), status);
        }

        HealthResponse {
            status: determine_overall_status(&dependencies, &critical),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            dependencies,
        }
    }
}

fn determine_overall_status(
    dependencies: &HashMap<String, DependencyStatus>,
    critical_deps: &[String],
) -> String {
    let mut has_critical_failure = false;
    let mut has_non_critical_failure = false;

    for (name, status) in dependencies {
        if matches!(status, DependencyStatus::Unhealthy { .. }) {
            if critical_deps.iter().any(|c| c == name) {
                has_critical_failure = true;
            } else {
                has_non_critical_failure = true;
            }
        }
    }

    if has_critical_failure {
        "unhealthy".to_string()
    } else if has_non_critical_failure {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}
