use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::services::{FieldErrors, ServiceError};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

impl ApiResponse<()> {
    pub fn error(code: &str, message: &str, fields: Option<FieldErrors>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
                fields,
            }),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Application error type
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub fields: Option<FieldErrors>,
}

impl AppError {
    pub fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.to_string(),
            fields: None,
        }
    }

    pub fn validation(fields: FieldErrors) -> Self {
        Self {
            fields: Some(fields),
            ..Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Invalid input.")
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn rate_limited(message: &str) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
    }

    pub fn internal(message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ApiResponse::error(&self.code, &self.message, self.fields);
        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(fields) => AppError::validation(fields),
            ServiceError::InvalidCredentials => AppError::unauthorized("Invalid Credentials"),
            ServiceError::InvalidToken => {
                AppError::unauthorized("Token is invalid or expired")
            }
            ServiceError::InactiveUser => {
                AppError::new(StatusCode::FORBIDDEN, "INACTIVE_USER", "User account is disabled.")
            }
            ServiceError::PermissionDenied(message) => AppError::forbidden(&message),
            ServiceError::NotFound(message) => AppError::not_found(&message),
            ServiceError::InvalidCode => AppError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_CODE",
                "Invalid referral code.",
            ),
            ServiceError::ExpiredCode => AppError::new(
                StatusCode::BAD_REQUEST,
                "EXPIRED_CODE",
                "Referral code has expired.",
            ),
            ServiceError::SelfReferral => AppError::new(
                StatusCode::BAD_REQUEST,
                "SELF_REFERRAL",
                "You cannot use your own referral code.",
            ),
            err @ (ServiceError::Store(_)
            | ServiceError::Token(_)
            | ServiceError::PasswordHash(_)) => {
                tracing::error!("Request failed: {}", err);
                AppError::internal("Internal server error")
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::validation(FieldErrors::from(errors))
    }
}
