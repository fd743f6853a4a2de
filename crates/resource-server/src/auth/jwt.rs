//! Bearer token verification.
//!
//! Validates access tokens using public keys fetched from the issuer's JWKS
//! endpoint.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only algorithms on the configured allow-list are accepted; `none` and
//!   the HMAC family are never accepted
//! - The signing key must be published for the token's algorithm
//! - Expiration, not-before and issued-at are validated with clock skew tolerance
//! - Audience and issuer must match the configuration exactly
//! - Every failure has the same generic Display message; the precise reason
//!   is only available through [`VerificationError::reason`]

use crate::auth::claims::{numeric_date, VerifiedClaims};
use crate::auth::jwks::JwksClient;
use crate::observability::metrics::record_token_validation;
use common::jwt::{
    parse_token, validate_exp_at, validate_iat_at, validate_nbf_at, BearerToken,
    JwtValidationError,
};
use jsonwebtoken::Algorithm;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Why a token was rejected.
///
/// Checks run in a fixed order and the first failure wins, so a token that
/// is both expired and carries the wrong audience reports `TokenExpired`.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum VerificationError {
    #[error("The access token is invalid or expired")]
    MalformedToken,

    #[error("The access token is invalid or expired")]
    UnsupportedAlgorithm,

    #[error("The access token is invalid or expired")]
    UntrustedSigner,

    #[error("The access token is invalid or expired")]
    InvalidSignature,

    #[error("The access token is invalid or expired")]
    TokenExpired,

    #[error("The access token is invalid or expired")]
    TokenNotYetValid,

    #[error("The access token is invalid or expired")]
    AudienceMismatch,

    #[error("The access token is invalid or expired")]
    IssuerMismatch,
}

impl VerificationError {
    /// Stable code for logs and metric labels.
    pub fn reason(&self) -> &'static str {
        match self {
            VerificationError::MalformedToken => "malformed_token",
            VerificationError::UnsupportedAlgorithm => "unsupported_algorithm",
            VerificationError::UntrustedSigner => "untrusted_signer",
            VerificationError::InvalidSignature => "invalid_signature",
            VerificationError::TokenExpired => "token_expired",
            VerificationError::TokenNotYetValid => "token_not_yet_valid",
            VerificationError::AudienceMismatch => "audience_mismatch",
            VerificationError::IssuerMismatch => "issuer_mismatch",
        }
    }
}

impl From<JwtValidationError> for VerificationError {
    fn from(err: JwtValidationError) -> Self {
        match err {
            JwtValidationError::TokenTooLarge | JwtValidationError::MalformedToken => {
                VerificationError::MalformedToken
            }
            JwtValidationError::Expired => VerificationError::TokenExpired,
            JwtValidationError::NotYetValid | JwtValidationError::IatTooFarInFuture => {
                VerificationError::TokenNotYetValid
            }
        }
    }
}

/// Token verifier bound to one issuer, one audience and one JWKS.
pub struct JwtValidator {
    /// JWKS client for fetching public keys.
    jwks_client: Arc<JwksClient>,

    /// Expected `iss`.
    issuer: String,

    /// Audience this resource server answers to.
    audience: String,

    /// Algorithms accepted in the token header.
    allowed_algorithms: Vec<Algorithm>,

    /// Clock skew tolerance for exp/nbf/iat.
    clock_skew: Duration,
}

impl JwtValidator {
    /// Create a new token verifier.
    ///
    /// HMAC algorithms are dropped from `allowed_algorithms`: a JWKS only
    /// carries public keys.
    pub fn new(
        jwks_client: Arc<JwksClient>,
        issuer: String,
        audience: String,
        allowed_algorithms: Vec<Algorithm>,
        clock_skew: Duration,
    ) -> Self {
        let allowed_algorithms = allowed_algorithms
            .into_iter()
            .filter(|alg| !is_symmetric(*alg))
            .collect();

        Self {
            jwks_client,
            issuer,
            audience,
            allowed_algorithms,
            clock_skew,
        }
    }

    /// Verify a raw bearer token at time `now` (Unix seconds).
    ///
    /// # Security Checks
    ///
    /// 1. Structure - size limit, three base64url segments, JSON header and payload
    /// 2. Header - allow-listed `alg`, `kid` present
    /// 3. Key resolution - key for `kid` exists and supports `alg`
    /// 4. Signature over `header.payload`
    /// 5. Validity window - `exp` (required), `nbf`, `iat`
    /// 6. Audience
    /// 7. Issuer
    ///
    /// # Errors
    ///
    /// Returns the [`VerificationError`] of the first failed check.
    #[instrument(skip_all)]
    pub async fn verify(&self, raw: &str, now: i64) -> Result<VerifiedClaims, VerificationError> {
        let result = self.verify_inner(raw, now).await;

        match &result {
            Ok(_) => {
                record_token_validation("success", "none");
                tracing::debug!(target: "rs.auth.jwt", "Token validated successfully");
            }
            Err(e) => {
                record_token_validation("failure", e.reason());
                tracing::debug!(target: "rs.auth.jwt", reason = e.reason(), "Token rejected");
            }
        }

        result
    }

    async fn verify_inner(&self, raw: &str, now: i64) -> Result<VerifiedClaims, VerificationError> {
        // 1. Structural parse (includes size check via common::jwt)
        let token = parse_token(raw)?;

        // 2. Header
        let alg = self.check_algorithm(&token)?;
        let kid = token
            .header
            .kid
            .as_deref()
            .ok_or(VerificationError::MalformedToken)?;

        // 3. Key resolution
        let key = self.jwks_client.get_key(kid).await.map_err(|e| {
            tracing::warn!(target: "rs.auth.jwt", kid = %kid, error = %e, "Signing key resolution failed");
            VerificationError::UntrustedSigner
        })?;
        if !key.supports(alg) {
            tracing::warn!(
                target: "rs.auth.jwt",
                kid = %kid,
                alg = ?alg,
                key_algorithms = ?key.algorithms(),
                "Token algorithm does not match signing key"
            );
            return Err(VerificationError::UntrustedSigner);
        }

        // 4. Signature
        let valid = jsonwebtoken::crypto::verify(
            token.signature_segment(),
            token.signing_input().as_bytes(),
            key.decoding_key(),
            alg,
        )
        .unwrap_or_else(|e| {
            tracing::debug!(target: "rs.auth.jwt", error = %e, "Signature verification errored");
            false
        });
        if !valid {
            return Err(VerificationError::InvalidSignature);
        }

        // 5. Validity window
        let exp = token
            .claims
            .get("exp")
            .and_then(numeric_date)
            .ok_or(VerificationError::MalformedToken)?;
        validate_exp_at(exp, self.clock_skew, now)?;
        if let Some(nbf) = optional_numeric_date(&token.claims, "nbf")? {
            validate_nbf_at(nbf, self.clock_skew, now)?;
        }
        if let Some(iat) = optional_numeric_date(&token.claims, "iat")? {
            validate_iat_at(iat, self.clock_skew, now)?;
        }

        // 6. Audience
        let audience = audience_set(token.claims.get("aud"));
        if !audience.iter().any(|aud| aud == &self.audience) {
            return Err(VerificationError::AudienceMismatch);
        }

        // 7. Issuer
        let issuer = token.claims.get("iss").and_then(Value::as_str);
        if issuer != Some(self.issuer.as_str()) {
            return Err(VerificationError::IssuerMismatch);
        }

        Ok(VerifiedClaims::new(
            self.issuer.clone(),
            audience,
            exp,
            token.claims,
        ))
    }

    fn check_algorithm(&self, token: &BearerToken<'_>) -> Result<Algorithm, VerificationError> {
        // "none" (any casing) does not parse into an Algorithm
        let alg = Algorithm::from_str(&token.header.alg).map_err(|_| {
            tracing::debug!(target: "rs.auth.jwt", alg = %token.header.alg, "Unknown token algorithm");
            VerificationError::UnsupportedAlgorithm
        })?;

        if is_symmetric(alg) || !self.allowed_algorithms.contains(&alg) {
            tracing::debug!(target: "rs.auth.jwt", alg = ?alg, "Token algorithm not allowed");
            return Err(VerificationError::UnsupportedAlgorithm);
        }

        Ok(alg)
    }
}

fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// An optional time claim. Present but not a NumericDate is malformed.
fn optional_numeric_date(
    claims: &Map<String, Value>,
    name: &'static str,
) -> Result<Option<i64>, VerificationError> {
    match claims.get(name) {
        None => Ok(None),
        Some(value) => numeric_date(value).map(Some).ok_or_else(|| {
            tracing::debug!(target: "rs.auth.jwt", claim = name, "Time claim is not a NumericDate");
            VerificationError::MalformedToken
        }),
    }
}

/// `aud` may be a single string or an array of strings.
fn audience_set(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(aud)) => vec![aud.clone()],
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
