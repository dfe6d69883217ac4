use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

use crate::handlers::webhook::REQUEST_ID_HEADER;

const MAX_BODY_LOG_SIZE: usize = 1024 * 64;
const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "access_token",
    "api_key",
    "authorization",
    "email",
    "card_number",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogConfig {
    pub log_body: bool,
}

/// Masks sensitive fields before a body is written to the log.
fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let val = if SENSITIVE_FIELDS.contains(&key.to_ascii_lowercase().as_str()) {
                        Value::String("****".to_string())
                    } else {
                        redact(val)
                    };
                    (key.clone(), val)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Logs every request and response. Keeps the caller's `x-request-id` (the
/// payment gateway signs it) and only generates one when it is missing.
pub async fn request_logger_middleware(
    State(config): State<RequestLogConfig>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = match req.headers().get(REQUEST_ID_HEADER) {
        Some(value) => value.clone(),
        None => {
            let generated = HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
            req.headers_mut().insert(REQUEST_ID_HEADER, generated.clone());
            generated
        }
    };
    let request_id_str = request_id.to_str().unwrap_or("invalid").to_string();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    if config.log_body {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_BODY_LOG_SIZE).await {
            Ok(bytes) => bytes,
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id_str,
                    method = %method,
                    uri = %uri,
                    "Request body too large or failed to read"
                );
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
        };

        let logged_body = match serde_json::from_slice::<Value>(&bytes) {
            Ok(json) => redact(&json).to_string(),
            Err(_) => format!("[non-json, {} bytes]", bytes.len()),
        };

        tracing::info!(
            request_id = %request_id_str,
            method = %method,
            uri = %uri,
            body_size = bytes.len(),
            body = %logged_body,
            "Incoming request"
        );

        req = Request::from_parts(parts, Body::from(bytes));
    } else {
        tracing::info!(
            request_id = %request_id_str,
            method = %method,
            uri = %uri,
            "Incoming request"
        );
    }

    let mut response = next.run(req).await;

    tracing::info!(
        request_id = %request_id_str,
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        latency_ms = start.elapsed().as_millis(),
        "Outgoing response"
    );

    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};
    use serde_json::json;
    use tower::ServiceExt;

    fn app(log_body: bool) -> Router {
        Router::new()
            .route("/test", post(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                RequestLogConfig { log_body },
                request_logger_middleware,
            ))
    }

    #[tokio::test]
    async fn test_request_logger_adds_request_id() {
        let response = app(false)
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_request_logger_keeps_caller_request_id() {
        let response = app(true)
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/test")
                    .header(REQUEST_ID_HEADER, "bb56a2f1-6aae-46ac-982e-9dcd3581d08e")
                    .body(Body::from(r#"{"type":"payment"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers()[REQUEST_ID_HEADER],
            "bb56a2f1-6aae-46ac-982e-9dcd3581d08e"
        );
    }

    #[test]
    fn test_redact_nested_fields() {
        let redacted = redact(&json!({
            "type": "payment",
            "payer": {"email": "buyer@example.com", "name": "Ana"},
            "access_token": "APP_USR-123"
        }));

        assert_eq!(redacted["type"], "payment");
        assert_eq!(redacted["payer"]["email"], "****");
        assert_eq!(redacted["payer"]["name"], "Ana");
        assert_eq!(redacted["access_token"], "****");
    }
}
