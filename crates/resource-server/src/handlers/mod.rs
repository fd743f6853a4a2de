//! HTTP request handlers for the resource server.

pub mod health;
pub mod metrics;
pub mod resources;
pub mod users;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use resources::{admin, confidential};
pub use users::get_me;
