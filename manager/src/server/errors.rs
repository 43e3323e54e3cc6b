//! Error to HTTP response mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use openapi_server::models::ErrorResponse;
use tracing::error;

use crate::errors::ManagerError;

impl ManagerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ManagerError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
            ManagerError::AlreadyExists(_) | ManagerError::DeployInProgress(_) => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ManagerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
            logs: self.logs(),
        };
        (status, Json(body)).into_response()
    }
}
