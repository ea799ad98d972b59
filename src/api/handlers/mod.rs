pub mod account;
pub mod article;
pub mod auth;
pub mod referral;
