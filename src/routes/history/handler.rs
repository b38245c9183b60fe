use axum::{Extension, extract::State, response::IntoResponse};

use crate::AppState;
use crate::error::AppError;
use crate::utils::{Claims, success_to_api_response};

use super::model::History;

#[axum::debug_handler]
pub async fn finished_trips(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let histories = History::finished_trips(&state.pool, claims.user_id).await?;
    Ok(success_to_api_response(histories))
}
