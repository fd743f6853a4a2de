//! Request gate.
//!
//! Takes a request's headers through
//! `Start -> TokenExtracted -> Verified -> Authorized` and either yields the
//! caller's [`Identity`] or a [`Rejection`]. Knows nothing about axum; the
//! layer in [`super::auth`] maps the outcome onto HTTP.

use crate::auth::{Identity, IdentityBuilder, JwtValidator, VerificationError};
use crate::policy::{AccessDecisionEngine, Decision, DenyReason, Policy};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::sync::Arc;
use tracing::instrument;

/// How far a request got before it was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStage {
    Start,
    TokenExtracted,
    Verified,
}

impl GateStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStage::Start => "start",
            GateStage::TokenExtracted => "token_extracted",
            GateStage::Verified => "verified",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnauthenticatedReason {
    /// No usable `Authorization: Bearer` header.
    MissingCredentials,

    /// A token was presented but failed verification.
    Verification(VerificationError),
}

/// Why the gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// 401: the caller could not be authenticated.
    Unauthenticated(UnauthenticatedReason),

    /// 403: the caller is authenticated but not allowed.
    Forbidden(DenyReason),
}

impl Rejection {
    /// Stage the request had reached when it was rejected.
    pub fn stage(&self) -> GateStage {
        match self {
            Rejection::Unauthenticated(UnauthenticatedReason::MissingCredentials) => {
                GateStage::Start
            }
            Rejection::Unauthenticated(UnauthenticatedReason::Verification(_)) => {
                GateStage::TokenExtracted
            }
            Rejection::Forbidden(_) => GateStage::Verified,
        }
    }

    /// Stable code for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::Unauthenticated(UnauthenticatedReason::MissingCredentials) => {
                "missing_credentials"
            }
            Rejection::Unauthenticated(UnauthenticatedReason::Verification(e)) => e.reason(),
            Rejection::Forbidden(reason) => reason.reason(),
        }
    }
}

/// Verifies the caller and evaluates a route's policy.
pub struct RequestGate {
    validator: Arc<JwtValidator>,
    identity_builder: IdentityBuilder,
    engine: AccessDecisionEngine,
}

impl RequestGate {
    pub fn new(
        validator: Arc<JwtValidator>,
        identity_builder: IdentityBuilder,
        engine: AccessDecisionEngine,
    ) -> Self {
        Self {
            validator,
            identity_builder,
            engine,
        }
    }

    /// Admit a request under `policy` at time `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] of the first stage that fails.
    #[instrument(skip_all, fields(policy = %policy))]
    pub async fn admit(
        &self,
        headers: &HeaderMap,
        policy: &Policy,
        now: i64,
    ) -> Result<Identity, Rejection> {
        let result = self.run(headers, policy, now).await;

        if let Err(rejection) = &result {
            tracing::info!(
                target: "rs.middleware.auth",
                stage = rejection.stage().as_str(),
                reason = rejection.reason(),
                "Request rejected"
            );
        }

        result
    }

    async fn run(
        &self,
        headers: &HeaderMap,
        policy: &Policy,
        now: i64,
    ) -> Result<Identity, Rejection> {
        // Start -> TokenExtracted
        let token = extract_bearer(headers).ok_or(Rejection::Unauthenticated(
            UnauthenticatedReason::MissingCredentials,
        ))?;

        // TokenExtracted -> Verified
        let claims = self
            .validator
            .verify(token, now)
            .await
            .map_err(|e| Rejection::Unauthenticated(UnauthenticatedReason::Verification(e)))?;
        let identity = self.identity_builder.build(claims, token);

        // Verified -> Authorized
        match self.engine.authorize(&identity, policy).await {
            Decision::Allow => Ok(identity),
            Decision::Deny(reason) => Err(Rejection::Forbidden(reason)),
        }
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively (RFC 7235); an empty token counts
/// as no token.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
