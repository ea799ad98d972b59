//! Account Service
//!
//! Registration, credential login, token refresh and staff-only user
//! administration.

use std::sync::Arc;
use validator::Validate;

use super::{FieldErrors, ServiceError, ServiceResult};
use crate::auth::jwt::{JwtManager, TokenPair, TokenType};
use crate::auth::middleware::AuthUser;
use crate::auth::password::PasswordHasher;
use crate::db::Store;
use crate::metrics;
use crate::models::{
    normalize_email, LoginRequest, NewUser, Page, RegisterRequest, UpdateUserFlagsRequest, User,
};

/// Runs on the blocking pool.
pub(crate) async fn hash_password(hasher: &PasswordHasher, password: String) -> ServiceResult<String> {
    let hasher = hasher.clone();
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| ServiceError::PasswordHash(e.to_string()))?
        .map_err(|e| ServiceError::PasswordHash(e.to_string()))
}

async fn verify_password(hasher: &PasswordHasher, password: String, hash: String) -> ServiceResult<bool> {
    let hasher = hasher.clone();
    tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
        .await
        .map_err(|e| ServiceError::PasswordHash(e.to_string()))
}

/// Check that username and email are free, then hash the password.
///
/// The store's unique constraints remain the final word; this only gives
/// the caller every conflicting field at once in the common case.
pub(crate) async fn prepare_new_user(
    store: &dyn Store,
    hasher: &PasswordHasher,
    username: String,
    email: Option<String>,
    password: String,
) -> ServiceResult<NewUser> {
    let email = email.map(|e| normalize_email(&e));

    let mut conflicts = FieldErrors::new();
    if store.find_user_by_username(&username).await?.is_some() {
        conflicts.add("username", "A user with that username already exists.");
    }
    if let Some(email) = &email {
        if store.find_user_by_email(email).await?.is_some() {
            conflicts.add("email", "A user with that email already exists.");
        }
    }
    if !conflicts.is_empty() {
        return Err(ServiceError::Validation(conflicts));
    }

    let password_hash = hash_password(hasher, password).await?;

    Ok(NewUser {
        username,
        email,
        password_hash,
    })
}

pub struct AccountService {
    store: Arc<dyn Store>,
    hasher: PasswordHasher,
    jwt: JwtManager,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>, hasher: PasswordHasher, jwt: JwtManager) -> Self {
        Self { store, hasher, jwt }
    }

    pub async fn register(&self, req: RegisterRequest) -> ServiceResult<User> {
        req.validate()?;
        // Presence is guaranteed by `validate`.
        let username = req.username.unwrap_or_default();
        let password = req.password.unwrap_or_default();

        let new_user =
            prepare_new_user(self.store.as_ref(), &self.hasher, username, req.email, password)
                .await?;
        let user = self.store.create_user(new_user).await?;

        metrics::record_user_registered("direct");
        tracing::info!("User registered: id={} username={}", user.id, user.username);

        Ok(user)
    }

    /// Authenticate by username or email and issue a token pair.
    pub async fn login(&self, req: LoginRequest) -> ServiceResult<TokenPair> {
        req.validate()?;
        let login = req.login.unwrap_or_default();
        let password = req.password.unwrap_or_default();

        // A username may look like someone else's email, so both matches are
        // tried and the one whose password verifies wins.
        let mut candidates = Vec::with_capacity(2);
        if let Some(user) = self.store.find_user_by_username(&login).await? {
            candidates.push(user);
        }
        if let Some(user) = self.store.find_user_by_email(&normalize_email(&login)).await? {
            if candidates.iter().all(|c| c.id != user.id) {
                candidates.push(user);
            }
        }

        if candidates.is_empty() {
            metrics::record_login("invalid_credentials");
            tracing::warn!("Login failed: no user matches {}", login);
            return Err(ServiceError::InvalidCredentials);
        }

        let mut authenticated = None;
        for candidate in candidates {
            if verify_password(&self.hasher, password.clone(), candidate.password_hash.clone()).await? {
                authenticated = Some(candidate);
                break;
            }
        }

        let Some(user) = authenticated else {
            metrics::record_login("invalid_credentials");
            tracing::warn!("Login failed: wrong password for {}", login);
            return Err(ServiceError::InvalidCredentials);
        };

        // Inactive status is only revealed to callers holding the right password.
        if !user.is_active {
            metrics::record_login("inactive");
            tracing::warn!("Login refused: user {} is inactive", user.id);
            return Err(ServiceError::InactiveUser);
        }

        let pair = self.jwt.generate_pair(user.id)?;
        metrics::record_login("success");
        tracing::info!("User {} logged in successfully", user.id);

        Ok(pair)
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> ServiceResult<(String, i64)> {
        let user_id = self
            .jwt
            .verify_token_of_type(refresh_token, TokenType::Refresh)
            .and_then(|claims| claims.user_id())
            .ok_or(ServiceError::InvalidToken)?;

        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if !user.is_active {
            return Err(ServiceError::InactiveUser);
        }

        Ok(self.jwt.generate_access_token(user.id)?)
    }

    /// Signature and expiry check for any token type.
    pub fn verify(&self, token: &str) -> ServiceResult<()> {
        self.jwt
            .verify_token(token)
            .map(|_| ())
            .map_err(|_| ServiceError::InvalidToken)
    }

    pub async fn get_user(&self, id: i64) -> ServiceResult<User> {
        self.store
            .find_user(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found.".to_string()))
    }

    pub async fn list_users(&self, caller: &AuthUser, page: Page) -> ServiceResult<(Vec<User>, i64)> {
        require_staff(caller)?;
        Ok(self.store.list_users(page).await?)
    }

    pub async fn update_user_flags(
        &self,
        caller: &AuthUser,
        id: i64,
        req: UpdateUserFlagsRequest,
    ) -> ServiceResult<User> {
        require_staff(caller)?;
        if caller.id == id && req.is_active == Some(false) {
            return Err(ServiceError::Validation(FieldErrors::single(
                "is_active",
                "You cannot deactivate your own account.",
            )));
        }

        let user = self
            .store
            .update_user_flags(id, req.is_active, req.is_staff)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found.".to_string()))?;

        tracing::info!(
            "User {} updated by staff {}: is_active={} is_staff={}",
            user.id,
            caller.id,
            user.is_active,
            user.is_staff
        );
        Ok(user)
    }
}

fn require_staff(caller: &AuthUser) -> ServiceResult<()> {
    if caller.is_staff {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied(
            "You do not have permission to perform this action.".to_string(),
        ))
    }
}
