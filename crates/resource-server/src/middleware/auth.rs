//! Authorization middleware for protected routes.
//!
//! Runs the [`RequestGate`] for the route's [`Policy`] and, when admitted,
//! injects the caller's `Identity` into request extensions.

use crate::errors::ApiError;
use crate::middleware::gate::{Rejection, RequestGate, UnauthenticatedReason};
use crate::policy::Policy;
use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    Router,
};
use common::jwt::unix_now;
use std::sync::Arc;
use tracing::instrument;

/// State for one protected route: the shared gate plus the route's policy.
#[derive(Clone)]
pub struct ProtectedRoute {
    pub gate: Arc<RequestGate>,
    pub policy: Arc<Policy>,
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Unauthenticated(UnauthenticatedReason::MissingCredentials) => {
                ApiError::MissingCredentials
            }
            Rejection::Unauthenticated(UnauthenticatedReason::Verification(_)) => {
                ApiError::InvalidToken
            }
            Rejection::Forbidden(_) => ApiError::Forbidden,
        }
    }
}

/// Middleware that admits requests through the gate.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - 401 Unauthorized with WWW-Authenticate header if the token is missing or invalid
/// - 403 Forbidden if the policy denies the caller
/// - Otherwise the handler runs with `Extension<Identity>` and its response is returned as is
#[instrument(skip_all, name = "rs.middleware.auth")]
pub async fn require_policy(
    State(route): State<ProtectedRoute>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = route
        .gate
        .admit(req.headers(), &route.policy, unix_now())
        .await?;

    tracing::debug!(
        target: "rs.middleware.auth",
        roles = identity.roles().len(),
        "Request admitted"
    );

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// Guard every route of `router` with `policy`.
///
/// Applied as a route layer, so unmatched paths still 404 instead of 401.
pub fn protect<S>(router: Router<S>, gate: Arc<RequestGate>, policy: Policy) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let route = ProtectedRoute {
        gate,
        policy: Arc::new(policy),
    };
    router.route_layer(middleware::from_fn_with_state(route, require_policy))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    // Full middleware tests with a signed token and mocked JWKS live in the
    // integration tests. These cover the rejection mapping and wiring.

    use super::*;
    use crate::auth::{IdentityBuilder, JwksClient, JwtValidator, VerificationError};
    use crate::policy::{AccessDecisionEngine, DenyReason};
    use axum::{body::Body, http::StatusCode, routing::get};
    use jsonwebtoken::Algorithm;
    use std::time::Duration;
    use tower::ServiceExt;

    fn gate() -> Arc<RequestGate> {
        let jwks = Arc::new(JwksClient::new("http://127.0.0.1:9/certs".to_string()));
        let validator = Arc::new(JwtValidator::new(
            jwks,
            "https://keycloak.example.com/realms/quarkus".to_string(),
            "backend-service".to_string(),
            vec![Algorithm::RS256],
            Duration::from_secs(300),
        ));
        Arc::new(RequestGate::new(
            validator,
            IdentityBuilder::new("realm_access.roles", "preferred_username", None),
            AccessDecisionEngine::new(),
        ))
    }

    #[test]
    fn test_protected_route_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<ProtectedRoute>();
    }

    #[test]
    fn test_rejection_mapping() {
        assert!(matches!(
            ApiError::from(Rejection::Unauthenticated(
                UnauthenticatedReason::MissingCredentials
            )),
            ApiError::MissingCredentials
        ));
        assert!(matches!(
            ApiError::from(Rejection::Unauthenticated(
                UnauthenticatedReason::Verification(VerificationError::UntrustedSigner)
            )),
            ApiError::InvalidToken
        ));
        assert!(matches!(
            ApiError::from(Rejection::Forbidden(DenyReason::PolicyEvaluationFailed)),
            ApiError::Forbidden
        ));
    }

    #[tokio::test]
    async fn test_protect_rejects_without_running_handler() {
        let app = protect(
            Router::new().route("/secret", get(|| async { "handler ran" })),
            gate(),
            Policy::Authenticated,
        );

        let response = app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/secret").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Route layers leave unknown paths alone
        let response = app
            .oneshot(axum::http::Request::builder().uri("/elsewhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
