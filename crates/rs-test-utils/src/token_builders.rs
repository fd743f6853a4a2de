//! Builder patterns for test token claims
//!
//! Produces Keycloak-shaped access token payloads.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Issuer used by default in built claims.
pub const TEST_ISSUER: &str = "https://keycloak.example.com/realms/quarkus";

/// Audience used by default in built claims.
pub const TEST_AUDIENCE: &str = "backend-service";

/// Builder for access token claims
///
/// # Example
/// ```rust,ignore
/// let claims = TestTokenBuilder::new()
///     .for_user("alice")
///     .with_roles(&["user"])
///     .expires_in(3600)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a new builder: subject `test-subject`, default issuer and
    /// audience, no roles, valid for an hour.
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!("test-subject"));
        claims.insert("iss".to_string(), json!(TEST_ISSUER));
        claims.insert("aud".to_string(), json!(TEST_AUDIENCE));
        claims.insert("exp".to_string(), json!((now + Duration::seconds(3600)).timestamp()));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert("typ".to_string(), json!("Bearer"));
        Self { claims }
    }

    /// Set subject and `preferred_username` to `user`.
    pub fn for_user(self, user: &str) -> Self {
        self.with_claim("sub", json!(format!("{}-id", user)))
            .with_claim("preferred_username", json!(user))
    }

    /// Realm roles (`realm_access.roles`).
    pub fn with_roles(self, roles: &[&str]) -> Self {
        self.with_claim("realm_access", json!({ "roles": roles }))
    }

    /// Client roles (`resource_access.<client>.roles`).
    pub fn with_client_roles(self, client: &str, roles: &[&str]) -> Self {
        self.with_claim("resource_access", json!({ client: { "roles": roles } }))
    }

    pub fn with_issuer(self, issuer: &str) -> Self {
        self.with_claim("iss", json!(issuer))
    }

    pub fn with_audience(self, audience: &str) -> Self {
        self.with_claim("aud", json!(audience))
    }

    /// Audience as an array.
    pub fn with_audiences(self, audiences: &[&str]) -> Self {
        self.with_claim("aud", json!(audiences))
    }

    /// Set expiration in seconds from now (negative for the past).
    pub fn expires_in(self, seconds: i64) -> Self {
        self.expires_at((Utc::now() + Duration::seconds(seconds)).timestamp())
    }

    pub fn expires_at(self, timestamp: i64) -> Self {
        self.with_claim("exp", json!(timestamp))
    }

    pub fn not_before(self, timestamp: i64) -> Self {
        self.with_claim("nbf", json!(timestamp))
    }

    /// Set issued-at timestamp
    pub fn issued_at(self, timestamp: i64) -> Self {
        self.with_claim("iat", json!(timestamp))
    }

    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
