pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod notifications;
pub mod ports;
pub mod secrets;
pub mod services;
pub mod startup;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::health::HealthRegistry;
use crate::middleware::request_logger::{request_logger_middleware, RequestLogConfig};
use crate::ports::{NotificationDispatcher, PaymentGateway, TransactionStore};
use crate::services::{EarningsAggregator, ReconciliationEngine, SignatureVerifier, StatusQuery};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub verifier: Arc<SignatureVerifier>,
    pub status_query: Arc<StatusQuery>,
    pub earnings: Arc<EarningsAggregator>,
    pub health: Arc<HealthRegistry>,
    pub request_log: RequestLogConfig,
}

impl AppState {
    /// Wires every service over the same store and gateway.
    pub fn new(
        store: Arc<dyn TransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationDispatcher>,
        webhook_secret: Option<String>,
        health: HealthRegistry,
    ) -> Self {
        Self {
            engine: Arc::new(ReconciliationEngine::new(
                store.clone(),
                gateway.clone(),
                notifier,
            )),
            verifier: Arc::new(SignatureVerifier::new(webhook_secret)),
            status_query: Arc::new(StatusQuery::new(store.clone(), gateway)),
            earnings: Arc::new(EarningsAggregator::new(store)),
            health: Arc::new(health),
            request_log: RequestLogConfig::default(),
        }
    }

    pub fn with_request_log(mut self, request_log: RequestLogConfig) -> Self {
        self.request_log = request_log;
        self
    }
}

pub fn create_app(state: AppState) -> Router {
    let request_log = state.request_log;

    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/payments", post(handlers::webhook::payment_webhook))
        .route(
            "/transactions/:id/status",
            get(handlers::transactions::get_transaction_status),
        )
        .route(
            "/sellers/:id/earnings",
            get(handlers::transactions::get_seller_earnings),
        )
        .layer(axum::middleware::from_fn_with_state(
            request_log,
            request_logger_middleware,
        ))
        .with_state(state)
}
