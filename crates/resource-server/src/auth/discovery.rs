//! OpenID Connect discovery.
//!
//! Resolves the issuer's `jwks_uri` from
//! `{issuer}/.well-known/openid-configuration` when no JWKS URL is configured.

use crate::config::validate_trusted_url;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery request failed: {0}")]
    Request(String),

    #[error("discovery endpoint returned status {0}")]
    Status(u16),

    #[error("malformed discovery document: {0}")]
    Malformed(String),

    #[error("discovery document issuer '{actual}' does not match configured issuer '{expected}'")]
    IssuerMismatch { expected: String, actual: String },

    #[error("untrusted jwks_uri: {0}")]
    UntrustedJwksUri(String),
}

/// The subset of provider metadata the resource server needs.
#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    jwks_uri: String,
}

/// Discovery document URL for an issuer.
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), WELL_KNOWN_PATH)
}

/// Fetch the issuer's metadata and return its `jwks_uri`.
///
/// The document's `issuer` must equal the configured issuer exactly and the
/// returned URI must pass the same HTTPS/loopback rule as configured URLs.
#[instrument(skip(client))]
pub async fn discover_jwks_url(
    issuer: &str,
    client: &reqwest::Client,
) -> Result<String, DiscoveryError> {
    let url = discovery_url(issuer);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| DiscoveryError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DiscoveryError::Status(status.as_u16()));
    }

    let metadata: ProviderMetadata = response
        .json()
        .await
        .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

    if metadata.issuer != issuer {
        return Err(DiscoveryError::IssuerMismatch {
            expected: issuer.to_string(),
            actual: metadata.issuer,
        });
    }

    validate_trusted_url("jwks_uri", &metadata.jwks_uri)
        .map_err(|e| DiscoveryError::UntrustedJwksUri(e.to_string()))?;

    tracing::info!(
        target: "rs.auth.discovery",
        jwks_uri = %metadata.jwks_uri,
        "Resolved JWKS URL from OIDC discovery"
    );

    Ok(metadata.jwks_uri)
}
