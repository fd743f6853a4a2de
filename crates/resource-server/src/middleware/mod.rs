//! Middleware for the resource server.
//!
//! # Components
//!
//! - `gate` - Framework-independent request gate (extract, verify, authorize)
//! - `auth` - Axum layer running the gate for protected routes
//! - `http_metrics` - HTTP request metrics for all responses

pub mod auth;
pub mod gate;
pub mod http_metrics;

pub use auth::{protect, require_policy, ProtectedRoute};
pub use gate::{GateStage, Rejection, RequestGate, UnauthenticatedReason};
pub use http_metrics::http_metrics_middleware;
