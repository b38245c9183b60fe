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

use super::model::{AddLocationRequest, CreateTripRequest, Trip, UpdateLocationRequest};

#[derive(Debug, Deserialize)]
pub struct TripIdQuery {
    pub trip_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct GroupIdQuery {
    pub group_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct LocationIdQuery {
    pub location_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLocationBody {
    pub group_id: i64,
    #[serde(flatten)]
    pub location: UpdateLocationRequest,
}

#[axum::debug_handler]
pub async fn create_trip(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateTripRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.date.trim().is_empty() {
        return Err(AppError::Validation("行程日期不能为空".to_string()));
    }
    let _ = claims;

    let trip_id = Trip::create(&state.pool, &req).await?;
    Ok((
        StatusCode::CREATED,
        success_to_api_response(serde_json::json!({ "trip_id": trip_id })),
    ))
}

#[axum::debug_handler]
pub async fn trip_details(
    State(state): State<AppState>,
    Query(query): Query<TripIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let details = Trip::details(&state.pool, query.trip_id).await?;
    Ok(success_to_api_response(details))
}

#[axum::debug_handler]
pub async fn my_trips(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let trips = Trip::for_user(&state.pool, claims.user_id).await?;
    Ok(success_to_api_response(trips))
}

#[axum::debug_handler]
pub async fn upcoming_trip(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let trip = Trip::upcoming(&state.pool, claims.user_id).await?;
    Ok(success_to_api_response(trip))
}

#[axum::debug_handler]
pub async fn joined_group_trip(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<GroupIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let trip_id = Trip::id_for_joined_group(&state.pool, claims.user_id, query.group_id).await?;
    Ok(success_to_api_response(serde_json::json!({
        "trip_id": trip_id
    })))
}

#[axum::debug_handler]
pub async fn add_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddLocationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let _ = claims;
    let location_id = Trip::add_location(&state.pool, &req).await?;
    Ok((
        StatusCode::CREATED,
        success_to_api_response(serde_json::json!({ "location_id": location_id })),
    ))
}

#[axum::debug_handler]
pub async fn update_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateLocationBody>,
) -> Result<impl IntoResponse, AppError> {
    let version = Trip::update_location(
        &state.pool,
        &state.config,
        claims.user_id,
        req.group_id,
        &req.location,
    )
    .await?;

    Ok(success_to_api_response(serde_json::json!({
        "version": version
    })))
}

#[axum::debug_handler]
pub async fn delete_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<LocationIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let _ = claims;
    Trip::delete_location(&state.pool, query.location_id).await?;
    Ok(success_to_api_response(serde_json::json!({
        "success": true
    })))
}
