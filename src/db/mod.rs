//! Persistence layer
//!
//! `Store` is the seam between services and storage. `PgStore` is the
//! PostgreSQL implementation; `MemoryStore` keeps everything in process
//! and is used by tests and when no database is configured. Both enforce
//! the same uniqueness rules, so callers can rely on `UniqueViolation`
//! even when an application-level pre-check raced with another request.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    Article, ArticleChanges, NewArticle, NewReferralCode, NewUser, Page, Referral, ReferralCode,
    Scope, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Columns guarded by a unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
    /// The referral code value itself.
    Code,
    /// One referral code per user.
    CodeOwner,
    /// One referral per referee.
    Referee,
}

impl UniqueField {
    /// Map a PostgreSQL constraint name (see `migrations/`) to the field.
    pub fn from_constraint(name: &str) -> Option<Self> {
        match name {
            "users_username_key" => Some(Self::Username),
            "users_email_key" => Some(Self::Email),
            "referral_codes_code_key" => Some(Self::Code),
            "referral_codes_user_id_key" => Some(Self::CodeOwner),
            "referrals_referee_id_key" => Some(Self::Referee),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0:?}")]
    UniqueViolation(UniqueField),
    #[error("referrer and referee must be different users")]
    SelfReferral,
    #[error("referenced row does not exist")]
    MissingReference,
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";
const PG_CHECK_VIOLATION: &str = "23514";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let constraint = db_err.constraint();
            match db_err.code().as_deref() {
                Some(PG_UNIQUE_VIOLATION) => {
                    if let Some(field) = constraint.and_then(UniqueField::from_constraint) {
                        return StoreError::UniqueViolation(field);
                    }
                }
                Some(PG_CHECK_VIOLATION) if constraint == Some("referrals_no_self_referral") => {
                    return StoreError::SelfReferral;
                }
                Some(PG_FOREIGN_KEY_VIOLATION) => return StoreError::MissingReference,
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    // Users
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn find_user(&self, id: i64) -> StoreResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self, page: Page) -> StoreResult<(Vec<User>, i64)>;
    async fn update_user_flags(
        &self,
        id: i64,
        is_active: Option<bool>,
        is_staff: Option<bool>,
    ) -> StoreResult<Option<User>>;

    // Articles
    async fn create_article(&self, article: NewArticle) -> StoreResult<Article>;
    async fn find_article(&self, id: i64) -> StoreResult<Option<Article>>;
    async fn list_articles(&self, scope: Scope, page: Page) -> StoreResult<(Vec<Article>, i64)>;
    async fn update_article(&self, id: i64, changes: &ArticleChanges)
        -> StoreResult<Option<Article>>;
    async fn delete_article(&self, id: i64) -> StoreResult<bool>;

    // Referral codes
    async fn create_referral_code(&self, code: NewReferralCode) -> StoreResult<ReferralCode>;
    async fn referral_code_exists(&self, code: &str) -> StoreResult<bool>;
    async fn find_referral_code(&self, id: i64) -> StoreResult<Option<ReferralCode>>;
    async fn find_referral_code_by_value(&self, code: &str) -> StoreResult<Option<ReferralCode>>;
    async fn find_referral_code_for_user(&self, user_id: i64)
        -> StoreResult<Option<ReferralCode>>;
    async fn list_referral_codes(&self, scope: Scope) -> StoreResult<Vec<ReferralCode>>;
    /// Delete the code if it is visible in `scope`; returns the deleted row.
    async fn delete_referral_code(&self, id: i64, scope: Scope)
        -> StoreResult<Option<ReferralCode>>;

    // Referrals
    /// Create the referee account and its referral record atomically.
    async fn create_user_with_referral(
        &self,
        user: NewUser,
        referrer_id: i64,
    ) -> StoreResult<(User, Referral)>;
    /// Referrals made by `referrer_id`, newest first.
    async fn list_referrals(&self, referrer_id: i64) -> StoreResult<Vec<Referral>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_names_map_to_fields() {
        assert_eq!(
            UniqueField::from_constraint("users_email_key"),
            Some(UniqueField::Email)
        );
        assert_eq!(
            UniqueField::from_constraint("referral_codes_user_id_key"),
            Some(UniqueField::CodeOwner)
        );
        assert_eq!(UniqueField::from_constraint("articles_pkey"), None);
    }

    #[test]
    fn test_non_database_errors_pass_through() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(sqlx::Error::RowNotFound)));
    }
}
