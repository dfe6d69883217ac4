use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::domain::{PaymentDetail, PaymentStatus};
use crate::ports::{GatewayError, PaymentGateway};

/// Payment resource as returned by `GET /v1/payments/{id}`.
#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: WireId,
    status: String,
    status_detail: Option<String>,
    external_reference: Option<String>,
    /// Major currency units.
    transaction_amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u64),
    Text(String),
}

impl PaymentResponse {
    fn into_detail(self) -> PaymentDetail {
        let payment_id = match self.id {
            WireId::Number(n) => n.to_string(),
            WireId::Text(s) => s,
        };
        PaymentDetail {
            payment_id,
            status: PaymentStatus::from(self.status),
            status_detail: self.status_detail,
            external_reference: self.external_reference,
            transaction_amount: self.transaction_amount.map(|a| (a * 100.0).round() as i64),
        }
    }
}

fn is_transient_failure(err: &GatewayError) -> bool {
    err.is_transient()
}

/// HTTP client for the payment gateway's payments API.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    access_token: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl HttpPaymentGateway {
    /// Creates a client with a 3-failure / 60s circuit breaker.
    pub fn new(base_url: String, access_token: String, timeout: Duration) -> Self {
        Self::with_circuit_breaker(base_url, access_token, timeout, 3, 60)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        access_token: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        HttpPaymentGateway {
            client,
            base_url,
            access_token,
            circuit_breaker,
        }
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentDetail, GatewayError> {
        let url = format!(
            "{}/v1/payments/{}",
            self.base_url.trim_end_matches('/'),
            payment_id
        );
        let client = self.client.clone();
        let token = self.access_token.clone();
        let id = payment_id.to_string();

        let result = self
            .circuit_breaker
            .call_with(is_transient_failure, async move {
                let response = client
                    .get(&url)
                    .bearer_auth(&token)
                    .send()
                    .await
                    .map_err(|e| {
                        if e.is_timeout() {
                            GatewayError::Unavailable(format!("request timed out: {}", e))
                        } else {
                            GatewayError::Unavailable(e.to_string())
                        }
                    })?;

                let status = response.status();
                if status == StatusCode::NOT_FOUND {
                    return Err(GatewayError::NotFound(id));
                }
                if status.is_server_error() {
                    return Err(GatewayError::Unavailable(format!("gateway returned {}", status)));
                }
                if !status.is_success() {
                    return Err(GatewayError::InvalidResponse(format!(
                        "unexpected status {}",
                        status
                    )));
                }

                let payment = response
                    .json::<PaymentResponse>()
                    .await
                    .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
                Ok(payment.into_detail())
            })
            .await;

        match result {
            Ok(detail) => Ok(detail),
            Err(FailsafeError::Rejected) => Err(GatewayError::Unavailable(
                "payment gateway circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}
