use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::warn;

use crate::error::PalmError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// 请求未携带正确的 token
#[derive(Debug, thiserror::Error)]
#[error("鉴权失败")]
pub struct Unauthorized;

/// API错误类型
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if self.0.is::<Unauthorized>() {
            return StatusCode::UNAUTHORIZED;
        }
        match self.0.downcast_ref::<PalmError>() {
            Some(
                PalmError::Busy
                | PalmError::DuplicateIdentity(_)
                | PalmError::AlreadyEnrolledUnderDifferentIdentity { .. },
            ) => StatusCode::CONFLICT,
            Some(
                PalmError::NoHandFound
                | PalmError::InsufficientVeinData
                | PalmError::Capture(_)
                | PalmError::EnrollmentIncomplete { .. }
                | PalmError::DimensionMismatch { .. },
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(PalmError::IdentityNotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("请求处理失败: {:#}", self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
