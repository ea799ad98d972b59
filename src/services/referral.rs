//! Referral Service
//!
//! Referral code issuance, lookup and deletion, and registration through a
//! referral code. A user holds at most one code; a code expires a fixed
//! number of days after creation.

use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use validator::Validate;

use super::account::prepare_new_user;
use super::{conflict_errors, ServiceError, ServiceResult};
use crate::auth::middleware::AuthUser;
use crate::auth::password::PasswordHasher;
use crate::db::{Store, StoreError, UniqueField};
use crate::metrics;
use crate::models::{
    normalize_email, ByEmailQuery, NewReferralCode, Referral, ReferralCode,
    RegisterWithReferralRequest, User, REFERRAL_CODE_LEN,
};

/// Draw a random alphanumeric referral code.
pub fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERRAL_CODE_LEN)
        .map(char::from)
        .collect()
}

pub struct ReferralService {
    store: Arc<dyn Store>,
    hasher: PasswordHasher,
    code_ttl: Duration,
}

impl ReferralService {
    pub fn new(store: Arc<dyn Store>, hasher: PasswordHasher, code_ttl_days: i64) -> Self {
        Self {
            store,
            hasher,
            code_ttl: Duration::days(code_ttl_days),
        }
    }

    pub async fn create_code(&self, caller: &AuthUser) -> ServiceResult<ReferralCode> {
        self.create_code_with(caller, generate_code).await
    }

    /// Issue a code for `caller`, drawing candidates from `generate` until
    /// one is free. There is no retry limit.
    pub async fn create_code_with<F>(&self, caller: &AuthUser, mut generate: F) -> ServiceResult<ReferralCode>
    where
        F: FnMut() -> String + Send,
    {
        if self.store.find_referral_code_for_user(caller.id).await?.is_some() {
            return Err(ServiceError::Validation(conflict_errors(UniqueField::CodeOwner)));
        }

        loop {
            let candidate = generate();
            if self.store.referral_code_exists(&candidate).await? {
                metrics::record_referral_code_collision();
                tracing::debug!("Referral code collision on pre-check, drawing again");
                continue;
            }

            let new_code = NewReferralCode {
                user_id: caller.id,
                code: candidate,
                expiration_date: Utc::now() + self.code_ttl,
            };
            match self.store.create_referral_code(new_code).await {
                Ok(code) => {
                    metrics::record_referral_code_created();
                    tracing::info!("Referral code created: {} for user {}", code.code, caller.id);
                    return Ok(code);
                }
                Err(StoreError::UniqueViolation(UniqueField::Code)) => {
                    // Another request stored the same value since the pre-check.
                    metrics::record_referral_code_collision();
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The caller's own codes.
    pub async fn list_codes(&self, caller: &AuthUser) -> ServiceResult<Vec<ReferralCode>> {
        Ok(self.store.list_referral_codes(caller.own_scope()).await?)
    }

    pub async fn get_code(&self, caller: &AuthUser, id: i64) -> ServiceResult<ReferralCode> {
        let code = self.find_code(id).await?;
        if !caller.own_scope().permits(Some(code.user_id)) {
            return Err(permission_denied());
        }
        Ok(code)
    }

    /// Delete one of the caller's codes. A code owned by someone else is
    /// reported as forbidden and left in place.
    pub async fn delete_code(&self, caller: &AuthUser, id: i64) -> ServiceResult<ReferralCode> {
        let code = self.find_code(id).await?;
        if !caller.own_scope().permits(Some(code.user_id)) {
            tracing::warn!(
                "User {} tried to delete referral code {} owned by user {}",
                caller.id,
                id,
                code.user_id
            );
            return Err(permission_denied());
        }

        let deleted = self
            .store
            .delete_referral_code(id, caller.own_scope())
            .await?
            .ok_or_else(|| ServiceError::NotFound("Referral code not found.".to_string()))?;

        tracing::info!("Referral code {} deleted by user {}", deleted.code, caller.id);
        Ok(deleted)
    }

    /// The referral code held by the user with `email`.
    pub async fn lookup_by_email(&self, query: ByEmailQuery) -> ServiceResult<ReferralCode> {
        query.validate()?;
        let email = normalize_email(query.email.as_deref().unwrap_or_default());

        let user = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User with this email does not exist.".to_string()))?;

        self.store
            .find_referral_code_for_user(user.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Referral code not found for this user.".to_string()))
    }

    /// Register a new user through a referral code. The account and its
    /// referral record are created together or not at all.
    pub async fn redeem(&self, req: RegisterWithReferralRequest) -> ServiceResult<(User, Referral)> {
        req.validate()?;
        let code_value = req.code.unwrap_or_default();
        let username = req.username.unwrap_or_default();
        let password = req.password.unwrap_or_default();

        let code = self
            .store
            .find_referral_code_by_value(&code_value)
            .await?
            .ok_or(ServiceError::InvalidCode)?;
        if !code.is_active() {
            tracing::info!("Rejected expired referral code {}", code.code);
            return Err(ServiceError::ExpiredCode);
        }

        if let Some(referrer) = self.store.find_user(code.user_id).await? {
            let same_email = match (&req.email, &referrer.email) {
                (Some(new), Some(existing)) => normalize_email(new) == *existing,
                _ => false,
            };
            if referrer.username == username || same_email {
                return Err(ServiceError::SelfReferral);
            }
        }

        let new_user =
            prepare_new_user(self.store.as_ref(), &self.hasher, username, req.email, password)
                .await?;
        let (user, referral) = self
            .store
            .create_user_with_referral(new_user, code.user_id)
            .await?;

        metrics::record_user_registered("referral");
        metrics::record_referral_redeemed();
        tracing::info!(
            "User {} registered with referral code {} from user {}",
            user.id,
            code.code,
            referral.referrer_id
        );

        Ok((user, referral))
    }

    /// Referrals made by `referrer_id`, newest first.
    pub async fn list_referrals(&self, referrer_id: i64) -> ServiceResult<Vec<Referral>> {
        if self.store.find_user(referrer_id).await?.is_none() {
            return Err(ServiceError::NotFound("Referrer not found.".to_string()));
        }
        Ok(self.store.list_referrals(referrer_id).await?)
    }

    async fn find_code(&self, id: i64) -> ServiceResult<ReferralCode> {
        self.store
            .find_referral_code(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Referral code not found.".to_string()))
    }
}

fn permission_denied() -> ServiceError {
    ServiceError::PermissionDenied(
        "You do not have permission to perform this action.".to_string(),
    )
}
