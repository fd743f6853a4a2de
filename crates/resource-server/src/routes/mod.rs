//! HTTP routes for the resource server.
//!
//! Defines the Axum router and application state.

use crate::auth::{IdentityBuilder, JwksClient, JwksSettings, JwtValidator};
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, protect, RequestGate};
use crate::policy::{AccessDecisionEngine, HttpPermissionEvaluator, Policy};
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Resource guarded by the delegated policy on `/api/confidential`.
pub const CONFIDENTIAL_RESOURCE: &str = "confidential";

/// Application state shared across the router.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Key resolver, shared with the gate (also used to warm the cache at startup).
    pub jwks_client: Arc<JwksClient>,

    /// Gate shared by every protected route.
    pub gate: Arc<RequestGate>,
}

impl AppState {
    /// Wire the authentication stack from configuration.
    ///
    /// `jwks_url` is passed separately because it may come from discovery.
    pub fn new(config: Config, jwks_url: String) -> Self {
        let jwks_client = Arc::new(JwksClient::with_settings(
            jwks_url,
            JwksSettings {
                cache_ttl: config.jwks_cache_ttl,
                fetch_timeout: config.jwks_fetch_timeout,
                min_refresh_interval: config.jwks_min_refresh_interval,
            },
        ));

        let validator = Arc::new(JwtValidator::new(
            Arc::clone(&jwks_client),
            config.issuer_url.clone(),
            config.audience.clone(),
            config.allowed_algorithms.clone(),
            config.jwt_clock_skew,
        ));

        let engine = match (&config.policy_endpoint_url, &config.policy_audience) {
            (Some(_), Some(audience)) => AccessDecisionEngine::with_evaluator(Arc::new(
                HttpPermissionEvaluator::new(audience.clone(), config.policy_timeout),
            )),
            _ => AccessDecisionEngine::new(),
        };

        let gate = Arc::new(RequestGate::new(
            validator,
            IdentityBuilder::from_config(&config),
            engine,
        ));

        Self {
            config,
            jwks_client,
            gate,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness check (simple "OK") - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/api/users/me` - Current user - requires role `user`
/// - `/api/admin` - requires role `admin`
/// - `/api/confidential` - delegated policy, only when a policy endpoint is configured
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new().route("/health", get(handlers::health_check));

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Protected routes, one policy each
    let mut protected_routes = Router::new()
        .merge(protect(
            Router::new().route("/api/users/me", get(handlers::get_me)),
            Arc::clone(&state.gate),
            Policy::required_role("user"),
        ))
        .merge(protect(
            Router::new().route("/api/admin", get(handlers::admin)),
            Arc::clone(&state.gate),
            Policy::required_role("admin"),
        ));

    if let Some(endpoint) = &state.config.policy_endpoint_url {
        protected_routes = protected_routes.merge(protect(
            Router::new().route("/api/confidential", get(handlers::confidential)),
            Arc::clone(&state.gate),
            Policy::delegated(endpoint.clone(), CONFIDENTIAL_RESOURCE),
        ));
    }

    // Merge routes and apply global middleware layers
    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let mut map = HashMap::from([
            (
                "OIDC_ISSUER_URL".to_string(),
                "https://keycloak.example.com/realms/quarkus".to_string(),
            ),
            ("OIDC_AUDIENCE".to_string(), "backend-service".to_string()),
        ]);
        for (k, v) in vars {
            map.insert((*k).to_string(), (*v).to_string());
        }
        Config::from_vars(&map).unwrap()
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_app_state_uses_given_jwks_url() {
        let state = AppState::new(
            config(&[]),
            "https://keycloak.example.com/realms/quarkus/protocol/openid-connect/certs".to_string(),
        );

        assert_eq!(
            state.jwks_client.jwks_url(),
            "https://keycloak.example.com/realms/quarkus/protocol/openid-connect/certs"
        );
    }

    #[test]
    fn test_app_state_with_policy_endpoint() {
        let state = AppState::new(
            config(&[
                (
                    "POLICY_ENDPOINT_URL",
                    "https://keycloak.example.com/realms/quarkus/protocol/openid-connect/token",
                ),
                ("POLICY_AUDIENCE", "backend-service"),
            ]),
            "https://keycloak.example.com/certs".to_string(),
        );

        assert!(state.config.policy_endpoint_url.is_some());
    }
}
