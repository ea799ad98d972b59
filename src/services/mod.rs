//! Domain services
//!
//! Services own the business rules and speak in `ServiceError`; they know
//! nothing about HTTP. Handlers translate errors via `AppError`.

pub mod account;
pub mod article;
pub mod referral;

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::db::{StoreError, UniqueField};

pub use account::AccountService;
pub use article::ArticleService;
pub use referral::ReferralService;

pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Field name → messages. Errors not tied to a field go under `non_field_errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: &str) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn non_field(message: &str) -> Self {
        Self::single(NON_FIELD_ERRORS, message)
    }

    pub fn add(&mut self, field: &str, message: &str) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn get(&self, field: &str) -> Option<&Vec<String>> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<validator::ValidationErrors> for FieldErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = FieldErrors::new();
        for (field, errs) in errors.field_errors() {
            for err in errs {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value ({}).", err.code));
                fields.add(field, &message);
            }
        }
        fields
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0:?}")]
    Validation(FieldErrors),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("user account is inactive")]
    InactiveUser,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("referral code does not exist")]
    InvalidCode,
    #[error("referral code has expired")]
    ExpiredCode,
    #[error("a user cannot refer themselves")]
    SelfReferral,
    #[error("storage error: {0}")]
    Store(StoreError),
    #[error("token encoding failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ServiceError::Validation(FieldErrors::from(errors))
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(field) => ServiceError::Validation(conflict_errors(field)),
            StoreError::SelfReferral => ServiceError::SelfReferral,
            other => ServiceError::Store(other),
        }
    }
}

/// The field-level message reported for a uniqueness conflict.
pub fn conflict_errors(field: UniqueField) -> FieldErrors {
    match field {
        UniqueField::Username => {
            FieldErrors::single("username", "A user with that username already exists.")
        }
        UniqueField::Email => FieldErrors::single("email", "A user with that email already exists."),
        UniqueField::CodeOwner => FieldErrors::non_field("User already has a referral code"),
        UniqueField::Code => FieldErrors::non_field("Referral code already exists."),
        UniqueField::Referee => FieldErrors::non_field("User has already been referred."),
    }
}
