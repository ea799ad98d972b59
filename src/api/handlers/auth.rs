//! Authentication API Handlers
//!
//! Registration, login and token refresh/verify. All routes here are public.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::jwt::TokenPair;
use crate::models::{LoginRequest, RegisterRequest, UserResponse};
use crate::utils::extract::JsonBody;
use crate::utils::response::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access: String,
    pub access_expires_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {}

/// Create a user account
/// POST /register
pub async fn register(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = state.account_service.register(req).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Exchange credentials for an access/refresh pair
/// POST /login
pub async fn login(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Json<TokenPair>, AppError> {
    let pair = state.account_service.login(req).await?;
    Ok(Json(pair))
}

/// POST /token/refresh
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let (access, access_expires_at) = state.account_service.refresh(&req.refresh).await?;
    Ok(Json(RefreshResponse {
        access,
        access_expires_at,
    }))
}

/// POST /token/verify
pub async fn verify_token(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    state.account_service.verify(&req.token)?;
    Ok(Json(VerifyResponse {}))
}
