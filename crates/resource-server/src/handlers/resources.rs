//! Role- and policy-protected resources.
//!
//! The handlers do no authorization of their own; reaching them means the
//! route's policy already allowed the caller.

use crate::auth::Identity;
use axum::Extension;
use tracing::instrument;

/// Handler for GET /api/admin (requires the `admin` role).
#[instrument(skip_all, name = "rs.handlers.admin")]
pub async fn admin(Extension(identity): Extension<Identity>) -> &'static str {
    tracing::debug!(target: "rs.handlers", roles = ?identity.roles(), "Admin resource served");
    "granted"
}

/// Handler for GET /api/confidential (delegated policy on `confidential`).
#[instrument(skip_all, name = "rs.handlers.confidential")]
pub async fn confidential(Extension(identity): Extension<Identity>) -> &'static str {
    tracing::debug!(target: "rs.handlers", roles = ?identity.roles(), "Confidential resource served");
    "confidential"
}
