//! Health check handler.
//!
//! `/health` is a liveness check: it answers as long as the process is
//! serving requests and checks no dependencies. The JWKS endpoint is not
//! contacted here; key fetch failures show up as 401s and in
//! `rs_jwks_refresh_total{status="error"}`.

/// Liveness handler.
pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check_returns_ok() {
        assert_eq!(health_check().await, "OK");
    }
}
