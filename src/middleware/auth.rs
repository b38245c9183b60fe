use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::error::AppError;
use crate::utils::verify_token;

/// 认证中间件
///
/// 校验 Authorization 头里的 Bearer 令牌（由外部认证服务签发），
/// 解析出的 Claims 挂到请求扩展上供各 handler 使用。
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = token else {
        return AppError::Unauthorized("缺少访问令牌".to_string()).into_response();
    };

    match verify_token(token, &state.config) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!("Token verification failed: {}", e);
            AppError::Unauthorized("访问令牌无效或已过期".to_string()).into_response()
        }
    }
}
