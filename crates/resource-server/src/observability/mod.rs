//! Observability for the resource server.
//!
//! Provides metrics definitions and the Prometheus recorder setup.

pub mod metrics;
