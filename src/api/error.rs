use crate::error::AppError;
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<Uuid>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("An analysis report already exists for this property: {report_id}")]
    DuplicateReport { report_id: Uuid },

    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::DuplicateReport { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::DuplicateReport { existing_id } => ApiError::DuplicateReport {
                report_id: existing_id,
            },
            StoreError::Invalid(msg) => ApiError::BadRequest(msg),
            StoreError::InvalidTransition { .. } => ApiError::BadRequest(err.to_string()),
            StoreError::Database(_) | StoreError::Serialization(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Store(store) => store.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if let ApiError::Internal(detail) = &self {
            error!("Request failed: {}", detail);
        }
        let report_id = match &self {
            ApiError::DuplicateReport { report_id } => Some(*report_id),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            report_id,
        };
        (code, Json(body)).into_response()
    }
}
