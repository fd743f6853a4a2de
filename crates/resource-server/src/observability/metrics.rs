//! Metrics definitions for the resource server.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rs_` prefix for the resource server
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: one value per mounted route plus `/other`
//! - `status`: bounded by code (success, failure, error, timeout)
//! - `reason`: the verification error codes plus `none`
//! - `policy`: authenticated, role, delegated
//!
//! Never label with subjects, principals, roles or token contents.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metrics are recorded. HTTP buckets are tuned
/// for an authorization hop that is usually a cache hit plus a signature check.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rs_http_request".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `rs_http_requests_total`, `rs_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
///
/// Captures every response, including the gate's 401/403 and framework-level
/// 404/405.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("rs_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("rs_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path onto a bounded label value.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/api/users/me" => "/api/users/me",
        "/api/admin" => "/api/admin",
        "/api/confidential" => "/api/confidential",
        _ => "/other",
    }
}

// ============================================================================
// Authentication Metrics
// ============================================================================

/// Record a token verification outcome
///
/// Metric: `rs_token_validations_total`
/// Labels: `status` (success, failure), `reason` (verification error code or `none`)
pub fn record_token_validation(status: &'static str, reason: &'static str) {
    counter!("rs_token_validations_total",
        "status" => status,
        "reason" => reason
    )
    .increment(1);
}

/// Record a JWKS refresh attempt
///
/// Metric: `rs_jwks_refresh_total`
/// Labels: `status` (success, error)
pub fn record_jwks_refresh(status: &'static str) {
    counter!("rs_jwks_refresh_total", "status" => status).increment(1);
}

// ============================================================================
// Authorization Metrics
// ============================================================================

/// Record an access decision
///
/// Metric: `rs_authz_decisions_total`
/// Labels: `policy` (authenticated, role, delegated), `decision` (allow, deny, error)
pub fn record_authz_decision(policy: &'static str, decision: &'static str) {
    counter!("rs_authz_decisions_total",
        "policy" => policy,
        "decision" => decision
    )
    .increment(1);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // These tests execute the recording functions against the global no-op
    // recorder. Value assertions live in the middleware tests, which install
    // a debugging recorder from metrics-util.

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/health", 200, Duration::from_millis(5));
        record_http_request("GET", "/api/users/me", 200, Duration::from_millis(50));
        record_http_request("GET", "/api/admin", 403, Duration::from_millis(10));
        record_http_request("GET", "/api/users/me", 401, Duration::from_millis(10));
        record_http_request("GET", "/api/confidential", 504, Duration::from_secs(30));
        record_http_request("GET", "/no/such/path", 404, Duration::from_millis(1));
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(299), "success");

        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");

        assert_eq!(categorize_status_code(401), "error");
        assert_eq!(categorize_status_code(403), "error");
        assert_eq!(categorize_status_code(500), "error");
    }

    #[test]
    fn test_normalize_endpoint_known_paths() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/metrics"), "/metrics");
        assert_eq!(normalize_endpoint("/api/users/me"), "/api/users/me");
        assert_eq!(normalize_endpoint("/api/admin"), "/api/admin");
        assert_eq!(normalize_endpoint("/api/confidential"), "/api/confidential");
    }

    #[test]
    fn test_normalize_endpoint_unknown_paths() {
        assert_eq!(normalize_endpoint("/"), "/other");
        assert_eq!(normalize_endpoint("/api/users/someone-else"), "/other");
        assert_eq!(normalize_endpoint("/api/admin/../users/me"), "/other");
    }

    #[test]
    fn test_record_auth_metrics() {
        record_token_validation("success", "none");
        record_token_validation("failure", "token_expired");
        record_jwks_refresh("success");
        record_jwks_refresh("error");
        record_authz_decision("role", "allow");
        record_authz_decision("delegated", "error");
    }
}
