use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::{Earnings, StatusView};
use crate::AppState;

/// Set by the upstream authentication layer.
pub const USER_ID_HEADER: &str = "x-user-id";

fn requester_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| AppError::Unauthorized("missing or invalid x-user-id header".to_string()))
}

pub async fn get_transaction_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<StatusView>, AppError> {
    let requester = requester_id(&headers)?;
    let view = state.status_query.check_status(requester, id).await?;
    Ok(Json(view))
}

pub async fn get_seller_earnings(
    State(state): State<AppState>,
    Path(seller_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Earnings>, AppError> {
    if requester_id(&headers)? != seller_id {
        return Err(AppError::Unauthorized(
            "earnings are only visible to the seller".to_string(),
        ));
    }
    let earnings = state.earnings.get_earnings(seller_id).await?;
    Ok(Json(earnings))
}
