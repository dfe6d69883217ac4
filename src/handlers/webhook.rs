use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::GatewayEvent;
use crate::services::WebhookReply;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Notification body: `{id, type, data: {id}}`. Ids arrive as numbers or
/// strings depending on the event.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WebhookPayload {
    pub id: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub data: Option<WebhookData>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WebhookData {
    pub id: Option<serde_json::Value>,
}

fn id_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads the body leniently. Some notifications only carry their fields in
/// the query string, with an empty or non-JSON body.
fn parse_payload(body: &[u8]) -> WebhookPayload {
    if body.iter().all(u8::is_ascii_whitespace) {
        return WebhookPayload::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        tracing::warn!(error = %e, body_size = body.len(), "Unparseable webhook body, using query parameters");
        WebhookPayload::default()
    })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

/// Payment gateway notifications.
///
/// Always answers `{success, message?}`. Logical failures are acknowledged
/// with 200 so the gateway stops redelivering them; transient failures get
/// 503 so it tries again.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookReply>) {
    let payload = parse_payload(&body);
    let data_id = payload
        .data
        .and_then(|d| d.id)
        .and_then(id_to_string)
        .or_else(|| params.get("data.id").cloned())
        .unwrap_or_default();
    let event_type = payload
        .event_type
        .or_else(|| params.get("type").cloned())
        .unwrap_or_default();
    let signature_header = header_str(&headers, SIGNATURE_HEADER);
    let request_id = header_str(&headers, REQUEST_ID_HEADER);

    if !state.verifier.verify(
        signature_header.as_deref().unwrap_or_default(),
        request_id.as_deref().unwrap_or_default(),
        &data_id,
    ) {
        tracing::warn!(data_id = %data_id, request_id = ?request_id, "Rejected webhook with invalid signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(WebhookReply::failed("Invalid signature", false)),
        );
    }

    let event = GatewayEvent {
        event_id: payload.id.and_then(id_to_string).unwrap_or_default(),
        event_type,
        data_id,
        signature_header,
        request_id,
        received_at: Utc::now(),
    };

    if event.is_payment() && event.data_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(WebhookReply::failed("Missing data.id", false)),
        );
    }

    let reply = state.engine.handle_webhook(&event).await;
    let status = if reply.retryable {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(reply))
}
