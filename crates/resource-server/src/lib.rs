//! Resource Server Library
//!
//! Bearer-token authorization for an HTTP resource server that trusts an
//! external OpenID Connect issuer (e.g. a Keycloak realm):
//!
//! - Access token verification against the issuer's JWKS
//! - Caller identity built from verified claims
//! - Role-based access control, with delegation of individual resources to
//!   an external policy endpoint
//!
//! Every failure path denies.
//!
//! # Architecture
//!
//! ```text
//! request -> middleware::auth -> middleware::gate
//!            gate: auth::jwt (auth::jwks) -> auth::identity -> policy
//!         -> handlers/*.rs (with Extension<Identity>)
//! ```
//!
//! # Modules
//!
//! - `auth` - Key resolution, token verification, identity
//! - `config` - Service configuration from environment
//! - `errors` - HTTP boundary error type
//! - `handlers` - HTTP request handlers
//! - `middleware` - Request gate and HTTP layers
//! - `observability` - Metrics
//! - `policy` - Access decisions
//! - `routes` - Axum router setup

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod policy;
pub mod routes;
