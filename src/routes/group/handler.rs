use axum::{
    Extension,
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::AppError;
use crate::utils::{Claims, success_to_api_response};

use super::model::{CreateGroupRequest, Group};

#[derive(Debug, Deserialize)]
pub struct GroupIdQuery {
    pub group_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateThumbnailRequest {
    pub group_id: i64,
    pub thumbnail_url: String,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub invite_code: String,
}

#[axum::debug_handler]
pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("群组名称不能为空".to_string()));
    }

    let group = Group::create(&state.pool, req.name.trim(), claims.user_id).await?;
    Ok((StatusCode::CREATED, success_to_api_response(group)))
}

#[axum::debug_handler]
pub async fn group_details(
    State(state): State<AppState>,
    Query(query): Query<GroupIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let group = Group::find_by_id(&state.pool, query.group_id)
        .await?
        .ok_or_else(|| AppError::NotFound("不存在的群组".to_string()))?;

    Ok(success_to_api_response(group))
}

#[axum::debug_handler]
pub async fn group_members(
    State(state): State<AppState>,
    Query(query): Query<GroupIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let members = Group::members(&state.pool, query.group_id).await?;
    Ok(success_to_api_response(members))
}

#[axum::debug_handler]
pub async fn create_invite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GroupIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let invite_code = Group::create_invite(&state.pool, req.group_id, claims.user_id).await?;
    Ok((
        StatusCode::CREATED,
        success_to_api_response(InviteResponse { invite_code }),
    ))
}

#[axum::debug_handler]
pub async fn update_thumbnail(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateThumbnailRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !Group::is_member(&state.pool, req.group_id, claims.user_id).await? {
        return Err(AppError::Forbidden("不是该群组的成员".to_string()));
    }

    Group::update_thumbnail(&state.pool, req.group_id, &req.thumbnail_url).await?;
    Ok(success_to_api_response(serde_json::json!({
        "success": true
    })))
}
