//! Test server harness for E2E testing
//!
//! Provides `TestResourceServer`: a real resource server bound to a random
//! port, trusting a wiremock "Keycloak" that serves the JWKS (and, when
//! enabled, the delegated policy endpoint).

use crate::crypto_fixtures::{jwks_json, FixtureError, TestKeypair};
use crate::token_builders::TestTokenBuilder;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use resource_server::config::Config;
use resource_server::observability::metrics::init_metrics_recorder;
use resource_server::routes::{self, AppState};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Realm path on the mock issuer.
pub const REALM_PATH: &str = "/realms/quarkus";

/// JWKS path on the mock issuer.
pub const JWKS_PATH: &str = "/realms/quarkus/protocol/openid-connect/certs";

/// Token endpoint path on the mock issuer (used for delegated decisions).
pub const TOKEN_PATH: &str = "/realms/quarkus/protocol/openid-connect/token";

/// Audience the test server is configured with.
pub const SERVER_AUDIENCE: &str = "backend-service";

/// Global metrics handle for test servers
static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// One recorder per test process; later servers share it.
pub fn test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Test harness for spawning the resource server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_user_endpoint() -> Result<()> {
///     let server = TestResourceServer::spawn().await?;
///     let token = server.sign(&server.token_builder().with_roles(&["user"]).build());
///
///     let response = reqwest::Client::new()
///         .get(format!("{}/api/users/me", server.url()))
///         .bearer_auth(token)
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestResourceServer {
    addr: SocketAddr,
    issuer: String,
    mock_server: MockServer,
    keypair: TestKeypair,
    config: Config,
    _handle: JoinHandle<()>,
}

impl TestResourceServer {
    /// Spawn a server without a policy endpoint.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(false, &[]).await
    }

    /// Spawn a server whose `/api/confidential` route delegates to the mock
    /// token endpoint. Mount a decision with [`Self::mount_policy_decision`].
    pub async fn spawn_with_delegated_policy() -> Result<Self, anyhow::Error> {
        Self::spawn_with(true, &[]).await
    }

    /// Spawn with extra configuration variables.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Trust a wiremock issuer publishing one Ed25519 key (`test-key-01`)
    /// - Start the HTTP server in the background
    pub async fn spawn_with(
        delegated_policy: bool,
        extra_vars: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let mock_server = MockServer::start().await;
        let keypair = TestKeypair::new(1, "test-key-01")?;

        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[keypair.jwk_json()])))
            .mount(&mock_server)
            .await;

        let issuer = format!("{}{}", mock_server.uri(), REALM_PATH);
        let jwks_url = format!("{}{}", mock_server.uri(), JWKS_PATH);

        let mut vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("OIDC_ISSUER_URL".to_string(), issuer.clone()),
            ("OIDC_JWKS_URL".to_string(), jwks_url.clone()),
            ("OIDC_AUDIENCE".to_string(), SERVER_AUDIENCE.to_string()),
        ]);
        if delegated_policy {
            vars.insert(
                "POLICY_ENDPOINT_URL".to_string(),
                format!("{}{}", mock_server.uri(), TOKEN_PATH),
            );
            vars.insert("POLICY_AUDIENCE".to_string(), SERVER_AUDIENCE.to_string());
            vars.insert("POLICY_TIMEOUT_SECONDS".to_string(), "1".to_string());
        }
        for (name, value) in extra_vars {
            vars.insert((*name).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let state = Arc::new(AppState::new(config.clone(), jwks_url));

        // Build routes using the real route builder
        let app = routes::build_routes(state, test_metrics_handle());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            issuer,
            mock_server,
            keypair,
            config,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Issuer the server trusts.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The mock issuer, for mounting additional endpoints.
    pub fn mock_server(&self) -> &MockServer {
        &self.mock_server
    }

    /// The trusted signing key.
    pub fn keypair(&self) -> &TestKeypair {
        &self.keypair
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Claims builder preset with this server's issuer and audience.
    pub fn token_builder(&self) -> TestTokenBuilder {
        TestTokenBuilder::new()
            .with_issuer(&self.issuer)
            .with_audience(SERVER_AUDIENCE)
    }

    /// Sign claims with the trusted key.
    pub fn sign(&self, claims: &Value) -> Result<String, FixtureError> {
        self.keypair.sign(claims)
    }

    /// Answer delegated decisions with `status` and `body`.
    pub async fn mount_policy_decision(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.mock_server)
            .await;
    }

    /// Answer delegated decisions with `{"result": allowed}`.
    pub async fn mount_policy_result(&self, allowed: bool) {
        self.mount_policy_decision(200, json!({ "result": allowed }))
            .await;
    }
}

impl Drop for TestResourceServer {
    fn drop(&mut self) {
        // Abort the HTTP server task so each test cleans up immediately
        self._handle.abort();
    }
}
