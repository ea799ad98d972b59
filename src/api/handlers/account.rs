//! User Account Handlers
//!
//! Own profile plus staff-only user administration.

use axum::{
    extract::State,
    Extension, Json,
};
use std::sync::Arc;

use crate::auth::middleware::AuthUser;
use crate::models::{PageQuery, UpdateUserFlagsRequest, UserListResponse, UserResponse};
use crate::utils::extract::{JsonBody, PathParam, QueryParams};
use crate::utils::response::AppError;
use crate::AppState;

/// GET /users/me
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.account_service.get_user(auth_user.id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// GET /users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    QueryParams(query): QueryParams<PageQuery>,
) -> Result<Json<UserListResponse>, AppError> {
    let (users, total) = state
        .account_service
        .list_users(&auth_user, query.into())
        .await?;

    Ok(Json(UserListResponse {
        users: users.into_iter().map(UserResponse::from).collect(),
        total,
    }))
}

/// Toggle `is_active` / `is_staff`
/// PATCH /users/:id
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    PathParam(user_id): PathParam<i64>,
    JsonBody(req): JsonBody<UpdateUserFlagsRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .account_service
        .update_user_flags(&auth_user, user_id, req)
        .await?;
    Ok(Json(UserResponse::from(user)))
}
