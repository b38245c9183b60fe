use axum::{
    Extension,
    extract::{Json, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::utils::{Claims, success_to_api_response};

use super::model::{DepartureOutcome, GroupDeparture};

#[derive(Debug, Deserialize)]
pub struct LeaveTripRequest {
    pub trip_id: i64,
}

#[axum::debug_handler]
pub async fn leave_trip(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<LeaveTripRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.trip_id <= 0 {
        return Err(AppError::Validation("行程ID无效".to_string()));
    }

    let outcome =
        GroupDeparture::leave_by_trip(&state.pool, &state.config, req.trip_id, claims.user_id)
            .await?;

    Ok(success_to_api_response(serde_json::json!({
        "success": true,
        "group_deleted": outcome == DepartureOutcome::GroupDeleted,
    })))
}
