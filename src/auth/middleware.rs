use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::auth::jwt::TokenType;
use crate::models::{Scope, User};
use crate::utils::response::AppError;
use crate::AppState;

/// The caller, resolved to a concrete user record when the request enters.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub is_staff: bool,
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            is_staff: user.is_staff,
        }
    }
}

impl AuthUser {
    /// Rows this caller owns.
    pub fn own_scope(&self) -> Scope {
        Scope::OwnedBy(self.id)
    }

    /// Whether the caller may mutate a row owned by `owner_id`.
    pub fn can_modify(&self, owner_id: Option<i64>) -> bool {
        self.is_staff || self.own_scope().permits(owner_id)
    }
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request)
        .ok_or_else(|| AppError::unauthorized("Authentication credentials were not provided."))?;

    let claims = state
        .jwt
        .verify_token_of_type(token, TokenType::Access)
        .ok_or_else(|| AppError::unauthorized("Given token not valid for any token type"))?;

    let user_id = claims
        .user_id()
        .ok_or_else(|| AppError::unauthorized("Token contained no recognizable user identification"))?;

    let user = state
        .store
        .find_user(user_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load user {} for authentication: {}", user_id, e);
            AppError::internal("Internal server error")
        })?
        .ok_or_else(|| AppError::unauthorized("User not found"))?;

    if !user.is_active {
        tracing::debug!("Rejected token for inactive user {}", user.id);
        return Err(AppError::unauthorized("User is inactive"));
    }

    request.extensions_mut().insert(AuthUser::from(user));

    Ok(next.run(request).await)
}
