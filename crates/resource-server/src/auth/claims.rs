//! Verified token claims.
//!
//! A `VerifiedClaims` value can only be produced by the token verifier after
//! every check has passed. The `sub` field is redacted in Debug output to
//! prevent exposure in logs.

use serde_json::{Map, Value};
use std::fmt;

/// Claims of a token whose signature, validity window, audience and issuer
/// have all been checked.
#[derive(Clone)]
pub struct VerifiedClaims {
    subject: Option<String>,
    issuer: String,
    audience: Vec<String>,
    expires_at: i64,
    not_before: Option<i64>,
    issued_at: Option<i64>,
    claims: Map<String, Value>,
}

impl VerifiedClaims {
    /// Only the verifier (and unit tests) build these.
    pub(crate) fn new(
        issuer: String,
        audience: Vec<String>,
        expires_at: i64,
        claims: Map<String, Value>,
    ) -> Self {
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let not_before = claims.get("nbf").and_then(numeric_date);
        let issued_at = claims.get("iat").and_then(numeric_date);

        Self {
            subject,
            issuer,
            audience,
            expires_at,
            not_before,
            issued_at,
            claims,
        }
    }

    /// Subject (`sub`), if the token carries one.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Issuer (`iss`). Always equal to the configured issuer.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Audience set (`aud`, normalized to a list).
    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    /// Expiry (`exp`, Unix seconds).
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Not-before (`nbf`, Unix seconds), when present.
    pub fn not_before(&self) -> Option<i64> {
        self.not_before
    }

    /// Issued-at (`iat`, Unix seconds), when present.
    pub fn issued_at(&self) -> Option<i64> {
        self.issued_at
    }

    /// Look up a top-level claim.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Look up a claim by dotted path, e.g. `realm_access.roles`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.claims.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// All claims as decoded from the payload.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }
}

/// Custom Debug implementation that redacts the subject and raw claims.
impl fmt::Debug for VerifiedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedClaims")
            .field("sub", &"[REDACTED]")
            .field("iss", &self.issuer)
            .field("aud", &self.audience)
            .field("exp", &self.expires_at)
            .field("nbf", &self.not_before)
            .field("iat", &self.issued_at)
            .finish_non_exhaustive()
    }
}

/// RFC 7519 NumericDate. Fractional values are truncated.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn numeric_date(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
}
