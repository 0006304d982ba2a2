//! Prometheus metrics for identity-service.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

/// Successful name resolutions by the rule that produced them.
pub static RESOLUTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_resolutions_total",
        "Total number of name resolutions",
        &["source"] // consent, context, preferred
    )
    .expect("Failed to register identity_resolutions_total")
});

/// Resolver sub-lookups that failed and were skipped.
pub static RESOLUTION_DEGRADED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_resolution_degraded_total",
        "Resolver lookups skipped after a store failure",
        &["rule"]
    )
    .expect("Failed to register identity_resolution_degraded_total")
});

/// Consent operations by action and outcome.
pub static CONSENT_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_consent_transitions_total",
        "Total number of consent operations",
        &["action", "outcome"] // outcome: transitioned, not_found
    )
    .expect("Failed to register identity_consent_transitions_total")
});

/// Session exchanges by outcome.
pub static TOKEN_EXCHANGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_token_exchanges_total",
        "Total number of authorization session exchanges",
        &["outcome"]
    )
    .expect("Failed to register identity_token_exchanges_total")
});

/// Bearer claim resolutions by outcome.
pub static CLAIMS_RESOLUTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_claims_resolutions_total",
        "Total number of bearer claim resolutions",
        &["outcome"]
    )
    .expect("Failed to register identity_claims_resolutions_total")
});

/// Audit entries that could not be stored after every retry.
pub static AUDIT_APPEND_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "identity_audit_append_failures_total",
        "Audit entries that exhausted their append retries"
    )
    .expect("Failed to register identity_audit_append_failures_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    service_core::observability::metrics::init_http_metrics();
    Lazy::force(&RESOLUTIONS_TOTAL);
    Lazy::force(&RESOLUTION_DEGRADED_TOTAL);
    Lazy::force(&CONSENT_TRANSITIONS_TOTAL);
    Lazy::force(&TOKEN_EXCHANGES_TOTAL);
    Lazy::force(&CLAIMS_RESOLUTIONS_TOTAL);
    Lazy::force(&AUDIT_APPEND_FAILURES_TOTAL);
}
