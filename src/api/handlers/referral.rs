//! Referral API Handlers
//!
//! Referral code management for signed-in users, lookup by owner email,
//! the referral ledger, and public registration through a code.

use axum::{
    extract::State,
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;

use crate::auth::middleware::AuthUser;
use crate::models::{
    ByEmailQuery, DeleteCodeResponse, RedeemResponse, ReferralCodeListResponse,
    ReferralCodeResponse, ReferralListResponse, ReferralResponse, RegisterWithReferralRequest,
    UserResponse,
};
use crate::utils::extract::{JsonBody, PathParam, QueryParams};
use crate::utils::response::AppError;
use crate::AppState;

/// List the caller's referral codes
/// GET /referral-codes
pub async fn list_codes(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<ReferralCodeListResponse>, AppError> {
    let codes = state.referral_service.list_codes(&auth_user).await?;
    let total = codes.len() as i64;

    Ok(Json(ReferralCodeListResponse {
        codes: codes.into_iter().map(ReferralCodeResponse::from).collect(),
        total,
    }))
}

/// Create the caller's referral code
/// POST /referral-codes
pub async fn create_code(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<(StatusCode, Json<ReferralCodeResponse>), AppError> {
    let code = state.referral_service.create_code(&auth_user).await?;
    Ok((StatusCode::CREATED, Json(ReferralCodeResponse::from(code))))
}

/// GET /referral-codes/:id
pub async fn get_code(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    PathParam(code_id): PathParam<i64>,
) -> Result<Json<ReferralCodeResponse>, AppError> {
    let code = state.referral_service.get_code(&auth_user, code_id).await?;
    Ok(Json(ReferralCodeResponse::from(code)))
}

/// DELETE /referral-codes/:id
pub async fn delete_code(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    PathParam(code_id): PathParam<i64>,
) -> Result<Json<DeleteCodeResponse>, AppError> {
    let code = state.referral_service.delete_code(&auth_user, code_id).await?;

    Ok(Json(DeleteCodeResponse {
        detail: "Referral code deleted.".to_string(),
        code: code.code,
    }))
}

/// Find a referral code by its owner's email
/// GET /referral/by-email?email=
pub async fn get_code_by_email(
    State(state): State<Arc<AppState>>,
    QueryParams(query): QueryParams<ByEmailQuery>,
) -> Result<Json<ReferralCodeResponse>, AppError> {
    let code = state.referral_service.lookup_by_email(query).await?;
    Ok(Json(ReferralCodeResponse::from(code)))
}

/// Register a new account through a referral code
/// POST /register/referral
pub async fn register_with_referral(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<RegisterWithReferralRequest>,
) -> Result<(StatusCode, Json<RedeemResponse>), AppError> {
    let (user, referral) = state.referral_service.redeem(req).await?;

    Ok((
        StatusCode::CREATED,
        Json(RedeemResponse {
            user: UserResponse::from(user),
            referral: ReferralResponse::from(referral),
        }),
    ))
}

/// Referrals made by a user, newest first
/// GET /referrals/:referrer_id
pub async fn list_referrals(
    State(state): State<Arc<AppState>>,
    PathParam(referrer_id): PathParam<i64>,
) -> Result<Json<ReferralListResponse>, AppError> {
    let referrals = state.referral_service.list_referrals(referrer_id).await?;
    let total = referrals.len() as i64;

    Ok(Json(ReferralListResponse {
        referrals: referrals.into_iter().map(ReferralResponse::from).collect(),
        total,
    }))
}
