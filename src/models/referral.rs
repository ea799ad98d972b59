use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::datetime_as_millis;
use super::user::{validate_username, UserResponse};

/// Length of generated referral codes.
pub const REFERRAL_CODE_LEN: usize = 20;

#[derive(Debug, Clone, FromRow)]
pub struct ReferralCode {
    pub id: i64,
    pub user_id: i64,
    pub code: String,
    pub expiration_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ReferralCode {
    /// A code is active strictly before its expiration instant.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date > now
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }
}

#[derive(Debug, Clone)]
pub struct NewReferralCode {
    pub user_id: i64,
    pub code: String,
    pub expiration_date: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Referral {
    pub id: i64,
    pub referrer_id: i64,
    pub referee_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralCodeResponse {
    pub id: i64,
    pub user_id: i64,
    pub code: String,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub expiration_date: DateTime<Utc>,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl From<ReferralCode> for ReferralCodeResponse {
    fn from(code: ReferralCode) -> Self {
        let is_active = code.is_active();
        Self {
            id: code.id,
            user_id: code.user_id,
            code: code.code,
            expiration_date: code.expiration_date,
            created_at: code.created_at,
            is_active,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReferralCodeListResponse {
    pub codes: Vec<ReferralCodeResponse>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct DeleteCodeResponse {
    pub detail: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralResponse {
    pub id: i64,
    pub referrer_id: i64,
    pub referee_id: i64,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
}

impl From<Referral> for ReferralResponse {
    fn from(referral: Referral) -> Self {
        Self {
            id: referral.id,
            referrer_id: referral.referrer_id,
            referee_id: referral.referee_id,
            created_at: referral.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReferralListResponse {
    pub referrals: Vec<ReferralResponse>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub user: UserResponse,
    pub referral: ReferralResponse,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ByEmailQuery {
    #[validate(
        required(message = "This field is required."),
        email(message = "Enter a valid email address.")
    )]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterWithReferralRequest {
    #[validate(
        required(message = "This field is required."),
        length(min = 1, message = "This field may not be blank.")
    )]
    pub code: Option<String>,
    #[validate(
        required(message = "This field is required."),
        custom = "validate_username"
    )]
    pub username: Option<String>,
    #[validate(email(message = "Enter a valid email address."))]
    pub email: Option<String>,
    #[validate(
        required(message = "This field is required."),
        length(min = 1, message = "This field may not be blank.")
    )]
    pub password: Option<String>,
}
