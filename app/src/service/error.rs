use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use pcd_core::Error;

/// A failed request, rendered as `{"error": message}`.
#[derive(Debug)]
pub enum ApiError {
    Pipeline(Error),
    BadRequest(String),
    NotFound,
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Pipeline(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Pipeline(err) => match err {
                Error::Parse { .. } | Error::Schema(_) | Error::Shape(_) | Error::Config(_) => {
                    StatusCode::BAD_REQUEST
                }
                Error::UnmappedClass(_) => StatusCode::UNPROCESSABLE_ENTITY,
                Error::Io { .. }
                | Error::ModelUnavailable
                | Error::Model(_)
                | Error::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Pipeline(err) => err.to_string(),
            ApiError::BadRequest(message) | ApiError::Internal(message) => message.clone(),
            ApiError::NotFound => "file not found".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            log::error!("request failed: {message}");
        } else {
            log::warn!("request rejected: {message}");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
