use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use crate::common::ApiResponse;
use crate::utils::error_codes;

/// 应用级错误分类
///
/// 多步变更中的每一类失败都映射到这里的一个变体；
/// `Contention` 只在重试策略内部消化，调用方最多只会看到 `RetryExhausted`。
#[derive(Debug)]
pub enum AppError {
    /// 请求参数缺失或格式错误，在访问存储之前就被拒绝
    Validation(String),
    /// 调用方身份缺失或无效
    Unauthorized(String),
    /// 调用方不是群组成员，或需要 HOST 身份而没有
    Forbidden(String),
    /// 引用的群组/行程/地点/账单不存在
    NotFound(String),
    /// 乐观版本号不匹配
    Conflict(String),
    /// 死锁或锁等待超时，可重试
    Contention(String),
    /// 重试次数耗尽
    RetryExhausted,
    /// 其余的存储错误
    Database(sqlx::Error),
    Internal(String),
}

/// 判断是否为锁争用类错误（Postgres SQLSTATE）
/// 40P01 = deadlock_detected, 55P03 = lock_not_available
pub fn is_lock_contention(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "40P01" || code == "55P03")
        .unwrap_or(false)
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if is_lock_contention(&err) {
            return AppError::Contention(err.to_string());
        }
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("记录不存在".to_string()),
            other => AppError::Database(other),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "参数错误: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "未授权: {}", msg),
            AppError::Forbidden(msg) => write!(f, "没有权限: {}", msg),
            AppError::NotFound(msg) => write!(f, "未找到: {}", msg),
            AppError::Conflict(msg) => write!(f, "版本冲突: {}", msg),
            AppError::Contention(msg) => write!(f, "锁争用: {}", msg),
            AppError::RetryExhausted => write!(f, "重试次数耗尽"),
            AppError::Database(err) => write!(f, "数据库错误: {}", err),
            AppError::Internal(msg) => write!(f, "内部错误: {}", msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                error_codes::VALIDATION_ERROR,
                msg.clone(),
            ),
            AppError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                msg.clone(),
            ),
            AppError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                error_codes::PERMISSION_DENIED,
                msg.clone(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, error_codes::CONFLICT, msg.clone()),
            // 锁争用只应该被重试策略吃掉，走到这里说明没有包上重试
            AppError::Contention(msg) => {
                tracing::error!("Contention error surfaced without retry: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    error_codes::RETRY_EXHAUSTED,
                    "服务器繁忙，请稍后再试".to_string(),
                )
            }
            AppError::RetryExhausted => (
                StatusCode::SERVICE_UNAVAILABLE,
                error_codes::RETRY_EXHAUSTED,
                "服务器繁忙，请稍后再试".to_string(),
            ),
            AppError::Database(err) => {
                tracing::error!("Database error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_codes::INTERNAL_ERROR,
                    "内部服务器错误".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_codes::INTERNAL_ERROR,
                    "内部服务器错误".to_string(),
                )
            }
        };

        let body = Json(ApiResponse::<()> {
            code,
            msg: message,
            resp_data: None,
        });

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn non_contention_errors_stay_database() {
        let err = AppError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, AppError::Database(_)));
    }
}
