use axum::{
    Extension,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::utils::{Claims, success_to_api_response};

use super::model::Analysis;

#[derive(Debug, Deserialize)]
pub struct TripIdQuery {
    pub trip_id: i64,
}

#[axum::debug_handler]
pub async fn expense_analysis(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<TripIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let _ = claims;
    let analysis = Analysis::analyze(&state.pool, query.trip_id).await?;

    // 分析完成即认为这趟行程收尾，无条件落 finished 标记
    Analysis::mark_group_finished(&state.pool, query.trip_id).await?;

    Ok(success_to_api_response(analysis))
}
