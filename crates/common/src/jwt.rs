//! JWT utilities shared across the resource server crates.
//!
//! This module provides the cheap, key-independent half of bearer token
//! validation:
//! - Size limits for DoS prevention
//! - Clock skew constants
//! - Structural parsing of compact JWS tokens (header, claims, signature)
//! - Temporal claim checks (`exp`, `nbf`, `iat`) against an explicit `now`
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Parsing never verifies a signature; a [`BearerToken`] is untrusted input
//!   until the caller has verified it against a key from a trusted JWKS
//! - Generic error messages prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{parse_token, validate_exp_at, DEFAULT_CLOCK_SKEW};
//!
//! let token = parse_token(raw)?;
//! let kid = token.header.kid.as_deref();
//! // ... resolve key, verify signature over token.signing_input() ...
//! validate_exp_at(exp, DEFAULT_CLOCK_SKEW, now)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected BEFORE any base64 decoding or
/// cryptographic work. Keycloak access tokens with a handful of realm and
/// client roles are typically 1-2KB, so 8KB leaves room for large role sets.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes).
///
/// Applied to `exp`, `nbf` and `iat` to absorb clock drift between the
/// Authorization Server and this service.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Prevents misconfiguration that would keep expired tokens usable for
/// an unreasonable amount of time.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced by structural parsing and temporal checks.
///
/// Note: Display messages are intentionally identical so that nothing about
/// the failure leaks to a client. Use `Debug` for logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (segments, base64url or JSON).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// `exp` is in the past, beyond clock skew.
    #[error("The access token is invalid or expired")]
    Expired,

    /// `nbf` is in the future, beyond clock skew.
    #[error("The access token is invalid or expired")]
    NotYetValid,

    /// `iat` is in the future, beyond clock skew.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Token Types
// =============================================================================

/// The JOSE header fields the verifier cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Signing algorithm name exactly as it appears in the token (`RS256`, `none`, ...).
    pub alg: String,

    /// Key ID used to select the verification key. Empty strings are treated as absent.
    pub kid: Option<String>,

    /// Token type hint (usually `JWT`).
    pub typ: Option<String>,
}

/// A structurally valid, NOT yet verified, compact JWS token.
///
/// Borrowing from the raw header value keeps the token scoped to the request
/// that carried it.
#[derive(Debug, Clone)]
pub struct BearerToken<'a> {
    raw: &'a str,
    signing_input: &'a str,
    signature_segment: &'a str,

    /// Decoded header.
    pub header: TokenHeader,

    /// Decoded payload. Always a JSON object.
    pub claims: Map<String, Value>,

    /// Decoded signature bytes (empty for unsigned tokens).
    pub signature: Vec<u8>,
}

impl<'a> BearerToken<'a> {
    /// The raw token string.
    #[must_use]
    pub fn raw(&self) -> &'a str {
        self.raw
    }

    /// `base64url(header) "." base64url(payload)`, the bytes the signature covers.
    #[must_use]
    pub fn signing_input(&self) -> &'a str {
        self.signing_input
    }

    /// The base64url-encoded signature segment.
    #[must_use]
    pub fn signature_segment(&self) -> &'a str {
        self.signature_segment
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Split a compact token into its three segments after the size check.
fn split_segments(token: &str) -> Result<(&str, &str, &str), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() =>
        {
            Ok((header, payload, signature))
        }
        _ => {
            tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
            Err(JwtValidationError::MalformedToken)
        }
    }
}

fn decode_json_object(segment: &str, part: &'static str) -> Result<Map<String, Value>, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", part, error = %e, "Failed to decode JWT segment base64");
        JwtValidationError::MalformedToken
    })?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => {
            tracing::debug!(target: "common.jwt", part, "JWT segment is not a JSON object");
            Err(JwtValidationError::MalformedToken)
        }
        Err(e) => {
            tracing::debug!(target: "common.jwt", part, error = %e, "Failed to parse JWT segment JSON");
            Err(JwtValidationError::MalformedToken)
        }
    }
}

fn header_from_map(map: &Map<String, Value>) -> Result<TokenHeader, JwtValidationError> {
    let alg = map
        .get("alg")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| {
            tracing::debug!(target: "common.jwt", "JWT header missing alg");
            JwtValidationError::MalformedToken
        })?;

    // Non-string and empty kids are both treated as absent
    let kid = map
        .get("kid")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    let typ = map
        .get("typ")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Ok(TokenHeader { alg, kid, typ })
}

/// Parse a compact JWS token into header, claims and signature.
///
/// This is the structural gate of bearer token verification. It does NOT
/// check the signature or any claim value.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Any segment fails to decode, or header/payload is not a JSON object
pub fn parse_token(token: &str) -> Result<BearerToken<'_>, JwtValidationError> {
    let (header_segment, payload_segment, signature_segment) = split_segments(token)?;

    let header = header_from_map(&decode_json_object(header_segment, "header")?)?;
    let claims = decode_json_object(payload_segment, "payload")?;

    let signature = URL_SAFE_NO_PAD.decode(signature_segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT signature base64");
        JwtValidationError::MalformedToken
    })?;

    // header.len() + '.' + payload.len() is always a char boundary inside `token`
    let signing_input = token
        .get(..header_segment.len() + 1 + payload_segment.len())
        .ok_or(JwtValidationError::MalformedToken)?;

    Ok(BearerToken {
        raw: token,
        signing_input,
        signature_segment,
        header,
        claims,
        signature,
    })
}

#[allow(clippy::cast_possible_wrap)]
fn skew_secs(clock_skew: Duration) -> i64 {
    // Bounded by MAX_CLOCK_SKEW in configuration, well within i64 range
    clock_skew.as_secs() as i64
}

/// Validate the `exp` claim against `now`.
///
/// A token is still accepted at exactly `exp + clock_skew`.
///
/// # Errors
///
/// Returns `JwtValidationError::Expired` when `now > exp + clock_skew`.
pub fn validate_exp_at(exp: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    let latest = exp.saturating_add(skew_secs(clock_skew));
    if now > latest {
        tracing::debug!(
            target: "common.jwt",
            exp = exp,
            now = now,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }
    Ok(())
}

/// Validate the `nbf` (not-before) claim against `now`.
///
/// # Errors
///
/// Returns `JwtValidationError::NotYetValid` when `now + clock_skew < nbf`.
pub fn validate_nbf_at(nbf: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    if now.saturating_add(skew_secs(clock_skew)) < nbf {
        tracing::debug!(
            target: "common.jwt",
            nbf = nbf,
            now = now,
            "Token rejected: not yet valid"
        );
        return Err(JwtValidationError::NotYetValid);
    }
    Ok(())
}

/// Validate the `iat` (issued-at) claim against `now`.
///
/// Rejects tokens issued too far in the future, which indicates pre-generated
/// tokens or a badly skewed issuer clock.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` when `iat > now + clock_skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    let max_iat = now.saturating_add(skew_secs(clock_skew));
    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }
    Ok(())
}

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// Tests
// =============================================================================
