//! Bearer token authentication.
//!
//! - [`jwks`] resolves signing keys from the issuer's JWKS
//! - [`discovery`] finds the JWKS URL via OIDC discovery
//! - [`jwt`] verifies tokens into [`VerifiedClaims`]
//! - [`identity`] maps verified claims to the caller's [`Identity`]

pub mod claims;
pub mod discovery;
pub mod identity;
pub mod jwks;
pub mod jwt;

pub use claims::VerifiedClaims;
pub use identity::{Identity, IdentityBuilder};
pub use jwks::{JwksClient, JwksSettings, KeyResolutionError, SigningKey};
pub use jwt::{JwtValidator, VerificationError};
