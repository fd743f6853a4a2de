//! # RS Test Utilities
//!
//! Shared test utilities for the resource server.
//!
//! This crate provides:
//! - Signing keypairs that publish JWKs (`crypto_fixtures`)
//! - Keycloak-shaped access token claims (`token_builders`)
//! - Server test harness (`TestResourceServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rs_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let server = TestResourceServer::spawn().await?;
//!     let token = server.sign(&server.token_builder().with_roles(&["admin"]).build());
//!
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/api/admin", server.url()))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
