//! Resource server configuration.
//!
//! Configuration is loaded from environment variables. Every URL the service
//! trusts keys or decisions from is validated at startup: HTTPS is required,
//! plain HTTP is accepted only for loopback hosts (local Keycloak, tests).

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use jsonwebtoken::Algorithm;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default claim path holding realm roles (Keycloak layout).
pub const DEFAULT_ROLES_CLAIM: &str = "realm_access.roles";

/// Default claim holding the principal name.
pub const DEFAULT_PRINCIPAL_CLAIM: &str = "preferred_username";

/// Default accepted signing algorithms.
pub const DEFAULT_ALLOWED_ALGORITHMS: &str = "RS256,ES256,EdDSA";

/// Default JWKS cache TTL in seconds (5 minutes).
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 300;

/// Default JWKS fetch timeout in seconds.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 5;

/// Default minimum interval between unknown-kid JWKS refreshes.
pub const DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS: u64 = 10;

/// Default delegated policy call timeout in seconds.
pub const DEFAULT_POLICY_TIMEOUT_SECONDS: u64 = 5;

/// Resource server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Trusted issuer; tokens must carry exactly this `iss`.
    pub issuer_url: String,

    /// Explicit JWKS endpoint. When `None` it is discovered from the issuer.
    pub jwks_url: Option<String>,

    /// Audience that must appear in every accepted token's `aud`.
    pub audience: String,

    /// Signing algorithms accepted in token headers.
    pub allowed_algorithms: Vec<Algorithm>,

    /// Clock skew tolerance for `exp`, `nbf` and `iat`.
    pub jwt_clock_skew: Duration,

    /// Dotted claim path for roles (default: `realm_access.roles`).
    pub roles_claim: String,

    /// Claim used as principal name, falling back to `sub`.
    pub principal_claim: String,

    /// Client id whose `resource_access.<client>.roles` are merged into the role set.
    pub client_roles_from: Option<String>,

    /// How long a fetched key set is trusted before refresh.
    pub jwks_cache_ttl: Duration,

    /// Timeout for a single JWKS (or discovery) HTTP call.
    pub jwks_fetch_timeout: Duration,

    /// Minimum spacing of refreshes triggered by unknown key IDs.
    pub jwks_min_refresh_interval: Duration,

    /// Delegated policy endpoint. Delegated routes are only mounted when set.
    pub policy_endpoint_url: Option<String>,

    /// Client (resource server) id sent as `audience` on delegated policy calls.
    pub policy_audience: Option<String>,

    /// Timeout for a single delegated policy call.
    pub policy_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid URL configuration: {0}")]
    InvalidUrl(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid algorithm configuration: {0}")]
    InvalidAlgorithm(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let issuer_url = required(vars, "OIDC_ISSUER_URL")?;
        validate_trusted_url("OIDC_ISSUER_URL", &issuer_url)?;

        let jwks_url = vars.get("OIDC_JWKS_URL").cloned();
        if let Some(url) = &jwks_url {
            validate_trusted_url("OIDC_JWKS_URL", url)?;
        }

        let audience = required(vars, "OIDC_AUDIENCE")?;

        let allowed_algorithms = parse_algorithms(
            vars.get("OIDC_ALLOWED_ALGORITHMS")
                .map(String::as_str)
                .unwrap_or(DEFAULT_ALLOWED_ALGORITHMS),
        )?;

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            if value.unsigned_abs() > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            Duration::from_secs(value.unsigned_abs())
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let roles_claim = non_empty_or(vars, "OIDC_ROLES_CLAIM", DEFAULT_ROLES_CLAIM);
        let principal_claim = non_empty_or(vars, "OIDC_PRINCIPAL_CLAIM", DEFAULT_PRINCIPAL_CLAIM);
        let client_roles_from = vars
            .get("OIDC_CLIENT_ROLES_FROM")
            .filter(|v| !v.is_empty())
            .cloned();

        let jwks_cache_ttl = parse_seconds(
            vars,
            "JWKS_CACHE_TTL_SECONDS",
            DEFAULT_JWKS_CACHE_TTL_SECONDS,
        )?;
        let jwks_fetch_timeout = parse_seconds(
            vars,
            "JWKS_FETCH_TIMEOUT_SECONDS",
            DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS,
        )?;
        let jwks_min_refresh_interval = parse_seconds(
            vars,
            "JWKS_MIN_REFRESH_INTERVAL_SECONDS",
            DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS,
        )?;

        let policy_endpoint_url = vars
            .get("POLICY_ENDPOINT_URL")
            .filter(|v| !v.is_empty())
            .cloned();
        let policy_audience = match &policy_endpoint_url {
            Some(url) => {
                validate_trusted_url("POLICY_ENDPOINT_URL", url)?;
                Some(required(vars, "POLICY_AUDIENCE")?)
            }
            None => vars.get("POLICY_AUDIENCE").cloned(),
        };
        let policy_timeout = parse_seconds(
            vars,
            "POLICY_TIMEOUT_SECONDS",
            DEFAULT_POLICY_TIMEOUT_SECONDS,
        )?;

        Ok(Config {
            bind_address,
            issuer_url,
            jwks_url,
            audience,
            allowed_algorithms,
            jwt_clock_skew,
            roles_claim,
            principal_claim,
            client_roles_from,
            jwks_cache_ttl,
            jwks_fetch_timeout,
            jwks_min_refresh_interval,
            policy_endpoint_url,
            policy_audience,
            policy_timeout,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn non_empty_or(vars: &HashMap<String, String>, name: &str, default: &str) -> String {
    vars.get(name)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(Duration::from_secs(default));
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidDuration(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(Duration::from_secs(value))
}

/// Accept `https`, or `http` only for exact loopback hosts.
///
/// Parsing the URL (instead of prefix matching) rejects hosts such as
/// `localhost.attacker.example`.
pub(crate) fn validate_trusted_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("{} is not a valid URL: {}", name, e)))?;

    match url.scheme() {
        "https" => Ok(()),
        "http" => match url.host_str() {
            Some("localhost") | Some("127.0.0.1") | Some("[::1]") => Ok(()),
            _ => Err(ConfigError::InvalidUrl(format!(
                "{} must use https (http is only allowed for localhost), got '{}'",
                name, value
            ))),
        },
        other => Err(ConfigError::InvalidUrl(format!(
            "{} has unsupported scheme '{}'",
            name, other
        ))),
    }
}

fn parse_algorithms(value: &str) -> Result<Vec<Algorithm>, ConfigError> {
    let mut algorithms = Vec::new();

    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let alg = Algorithm::from_str(name).map_err(|_| {
            ConfigError::InvalidAlgorithm(format!("unknown signing algorithm '{}'", name))
        })?;

        // Shared-secret algorithms have no place next to a public JWKS
        if matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(ConfigError::InvalidAlgorithm(format!(
                "symmetric algorithm '{}' cannot be verified with JWKS public keys",
                name
            )));
        }

        if !algorithms.contains(&alg) {
            algorithms.push(alg);
        }
    }

    if algorithms.is_empty() {
        return Err(ConfigError::InvalidAlgorithm(
            "OIDC_ALLOWED_ALGORITHMS must name at least one algorithm".to_string(),
        ));
    }

    Ok(algorithms)
}
