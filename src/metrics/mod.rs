//! Metrics Module
//!
//! Prometheus-compatible metrics:
//! - API request metrics (latency, count, in flight)
//! - Account metrics (registrations, logins)
//! - Referral metrics (codes issued, redemptions, collisions)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Metric names as constants for consistency
pub mod names {
    // API Metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";

    // Account Metrics
    pub const USERS_REGISTERED_TOTAL: &str = "users_registered_total";
    pub const LOGINS_TOTAL: &str = "logins_total";

    // Referral Metrics
    pub const REFERRAL_CODES_CREATED_TOTAL: &str = "referral_codes_created_total";
    pub const REFERRAL_CODE_COLLISIONS_TOTAL: &str = "referral_code_collisions_total";
    pub const REFERRALS_REDEEMED_TOTAL: &str = "referrals_redeemed_total";
}

/// Label keys
pub mod labels {
    pub const METHOD: &str = "method";
    pub const ENDPOINT: &str = "endpoint";
    pub const STATUS: &str = "status";
    pub const RESULT: &str = "result";
    pub const SOURCE: &str = "source";
}

/// Install the Prometheus recorder and return the handle used by `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::HTTP_REQUEST_DURATION_SECONDS.to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )?
        .install_recorder()
}

// ============================================================================
// HTTP Metrics
// ============================================================================

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    counter!(
        names::HTTP_REQUESTS_TOTAL,
        labels::METHOD => method.to_string(),
        labels::ENDPOINT => endpoint.to_string(),
        labels::STATUS => status_str.clone()
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        labels::METHOD => method.to_string(),
        labels::ENDPOINT => endpoint.to_string(),
        labels::STATUS => status_str
    )
    .record(duration_secs);
}

pub fn http_request_started() {
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
}

pub fn http_request_finished() {
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);
}

// ============================================================================
// Account Metrics
// ============================================================================

/// `source` is "direct" or "referral".
pub fn record_user_registered(source: &'static str) {
    counter!(names::USERS_REGISTERED_TOTAL, labels::SOURCE => source).increment(1);
}

/// `result` is "success", "invalid_credentials" or "inactive".
pub fn record_login(result: &'static str) {
    counter!(names::LOGINS_TOTAL, labels::RESULT => result).increment(1);
}

// ============================================================================
// Referral Metrics
// ============================================================================

pub fn record_referral_code_created() {
    counter!(names::REFERRAL_CODES_CREATED_TOTAL).increment(1);
}

pub fn record_referral_code_collision() {
    counter!(names::REFERRAL_CODE_COLLISIONS_TOTAL).increment(1);
}

pub fn record_referral_redeemed() {
    counter!(names::REFERRALS_REDEEMED_TOTAL).increment(1);
}

// ============================================================================
// Timer Helper
// ============================================================================

/// Timer for measuring durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
