use axum::{
    Extension,
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::utils::{Claims, success_to_api_response};

use super::model::{Payment, PaymentData, PaymentUpdate};

#[derive(Debug, Deserialize)]
pub struct TripIdQuery {
    pub trip_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SavePaymentsRequest {
    pub payments: Vec<PaymentData>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentsRequest {
    pub payments: Vec<PaymentUpdate>,
}

#[axum::debug_handler]
pub async fn save_payments(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SavePaymentsRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.payments.is_empty() {
        return Err(AppError::Validation("没有要保存的账单".to_string()));
    }
    if req.payments.iter().any(|p| p.price < 0) {
        return Err(AppError::Validation("账单金额不能为负".to_string()));
    }
    let _ = claims;

    let payment_ids = Payment::save_batch(&state.pool, &state.config, &req.payments).await?;
    Ok((
        StatusCode::CREATED,
        success_to_api_response(serde_json::json!({ "payment_ids": payment_ids })),
    ))
}

#[axum::debug_handler]
pub async fn payments_by_trip(
    State(state): State<AppState>,
    Query(query): Query<TripIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let payments = Payment::by_trip(&state.pool, query.trip_id).await?;
    Ok(success_to_api_response(payments))
}

#[axum::debug_handler]
pub async fn update_payments(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePaymentsRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.payments.is_empty() {
        return Err(AppError::Validation("没有要更新的账单".to_string()));
    }
    let _ = claims;

    Payment::update_batch(&state.pool, &state.config, &req.payments).await?;
    Ok(success_to_api_response(serde_json::json!({
        "success": true
    })))
}

#[axum::debug_handler]
pub async fn payment_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<TripIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let members = Payment::members_for_trip(&state.pool, claims.user_id, query.trip_id).await?;
    Ok(success_to_api_response(members))
}
