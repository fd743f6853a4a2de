//! Delegated permission checks.
//!
//! [`PermissionEvaluator`] is the seam between the decision engine and an
//! external policy service. [`HttpPermissionEvaluator`] talks to Keycloak
//! Authorization Services in decision mode: an UMA ticket grant with
//! `response_mode=decision`, made with the caller's own access token.
//!
//! # Security
//!
//! - The caller's token is only sent to the configured policy endpoint
//! - Every call is bounded by a timeout
//! - Anything other than an explicit answer is an error, and errors deny

use crate::auth::Identity;
use common::secret::ExposeSecret;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

const UMA_TICKET_GRANT: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy request failed: {0}")]
    Request(String),

    #[error("policy request timed out")]
    Timeout,

    #[error("policy endpoint returned status {0}")]
    UnexpectedStatus(u16),

    #[error("malformed policy response: {0}")]
    MalformedResponse(String),
}

/// Answers "may this identity access this resource?".
///
/// `Ok(true)` allows, `Ok(false)` denies. Errors are turned into a deny by
/// the caller.
#[async_trait::async_trait]
pub trait PermissionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        endpoint: &str,
        resource_id: &str,
        identity: &Identity,
    ) -> Result<bool, PolicyError>;
}

#[derive(Debug, Deserialize)]
struct DecisionResponse {
    result: bool,
}

/// Keycloak decision-mode evaluator.
pub struct HttpPermissionEvaluator {
    http_client: reqwest::Client,

    /// Client ID of the resource server in the policy service.
    audience: String,

    timeout: Duration,
}

impl HttpPermissionEvaluator {
    /// # Arguments
    ///
    /// * `audience` - Resource server client ID the permissions belong to
    /// * `timeout` - Upper bound for one permission check
    pub fn new(audience: String, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "rs.policy", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            http_client,
            audience,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl PermissionEvaluator for HttpPermissionEvaluator {
    #[instrument(skip(self, identity), fields(resource_id = %resource_id))]
    async fn evaluate(
        &self,
        endpoint: &str,
        resource_id: &str,
        identity: &Identity,
    ) -> Result<bool, PolicyError> {
        let form = [
            ("grant_type", UMA_TICKET_GRANT),
            ("audience", self.audience.as_str()),
            ("permission", resource_id),
            ("response_mode", "decision"),
        ];

        let call = async {
            let response = self
                .http_client
                .post(endpoint)
                .bearer_auth(identity.access_token().expose_secret())
                .form(&form)
                .send()
                .await
                .map_err(|e| PolicyError::Request(e.to_string()))?;

            match response.status() {
                StatusCode::OK => {
                    let decision: DecisionResponse = response
                        .json()
                        .await
                        .map_err(|e| PolicyError::MalformedResponse(e.to_string()))?;
                    Ok(decision.result)
                }
                // Keycloak answers a denied permission with 403 (401 for an
                // unusable caller token)
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
                other => Err(PolicyError::UnexpectedStatus(other.as_u16())),
            }
        };

        let allowed = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| PolicyError::Timeout)??;

        tracing::debug!(target: "rs.policy", allowed, "Delegated policy answered");
        Ok(allowed)
    }
}

/// Mock evaluator for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed answer and counts calls.
    pub struct MockPermissionEvaluator {
        answer: Option<bool>,
        call_count: AtomicUsize,
    }

    impl MockPermissionEvaluator {
        pub fn allowing() -> Self {
            Self::with_answer(Some(true))
        }

        pub fn denying() -> Self {
            Self::with_answer(Some(false))
        }

        /// Fails every call.
        pub fn failing() -> Self {
            Self::with_answer(None)
        }

        fn with_answer(answer: Option<bool>) -> Self {
            Self {
                answer,
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PermissionEvaluator for MockPermissionEvaluator {
        async fn evaluate(
            &self,
            _endpoint: &str,
            _resource_id: &str,
            _identity: &Identity,
        ) -> Result<bool, PolicyError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.answer
                .ok_or_else(|| PolicyError::Request("mock evaluator failure".to_string()))
        }
    }
}
