pub mod transactions;
pub mod webhook;

use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health_response = state.health.check_health().await;

    // Return 503 if a critical dependency is down, 200 otherwise
    let status_code = if health_response.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(health_response))
}
