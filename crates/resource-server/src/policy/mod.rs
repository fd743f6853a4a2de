//! Access decisions for protected routes.
//!
//! Each protected route carries one [`Policy`], fixed when the router is
//! built. [`AccessDecisionEngine::authorize`] evaluates it against the
//! caller's [`Identity`]. Decisions are never cached.

pub mod delegated;

use crate::auth::Identity;
use crate::observability::metrics::record_authz_decision;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

pub use delegated::{HttpPermissionEvaluator, PermissionEvaluator, PolicyError};

/// What a caller must satisfy to reach a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    /// Any verified caller.
    Authenticated,

    /// The caller must hold this role.
    RequiredRole(String),

    /// Ask the external policy endpoint about `resource_id`.
    Delegated {
        endpoint: String,
        resource_id: String,
    },
}

impl Policy {
    pub fn required_role(role: impl Into<String>) -> Self {
        Policy::RequiredRole(role.into())
    }

    pub fn delegated(endpoint: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Policy::Delegated {
            endpoint: endpoint.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Metric label for this kind of policy.
    pub fn kind(&self) -> &'static str {
        match self {
            Policy::Authenticated => "authenticated",
            Policy::RequiredRole(_) => "role",
            Policy::Delegated { .. } => "delegated",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Authenticated => write!(f, "authenticated"),
            Policy::RequiredRole(role) => write!(f, "role:{}", role),
            Policy::Delegated { resource_id, .. } => write!(f, "delegated:{}", resource_id),
        }
    }
}

/// Why access was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The identity lacks the required role.
    MissingRole(String),

    /// The external evaluator answered "deny".
    PolicyDenied,

    /// The external evaluator could not be consulted or gave no usable answer.
    PolicyEvaluationFailed,
}

impl DenyReason {
    /// Stable code for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            DenyReason::MissingRole(_) => "missing_role",
            DenyReason::PolicyDenied => "policy_denied",
            DenyReason::PolicyEvaluationFailed => "policy_evaluation_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Evaluates policies. Cheap to clone.
#[derive(Clone, Default)]
pub struct AccessDecisionEngine {
    evaluator: Option<Arc<dyn PermissionEvaluator>>,
}

impl AccessDecisionEngine {
    /// Engine without an external evaluator; delegated policies always deny.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that consults `evaluator` for delegated policies.
    pub fn with_evaluator(evaluator: Arc<dyn PermissionEvaluator>) -> Self {
        Self {
            evaluator: Some(evaluator),
        }
    }

    /// Decide whether `identity` satisfies `policy`.
    #[instrument(skip_all, fields(policy = %policy))]
    pub async fn authorize(&self, identity: &Identity, policy: &Policy) -> Decision {
        let decision = match policy {
            Policy::Authenticated => Decision::Allow,
            Policy::RequiredRole(role) => {
                if identity.has_role(role) {
                    Decision::Allow
                } else {
                    Decision::Deny(DenyReason::MissingRole(role.clone()))
                }
            }
            Policy::Delegated {
                endpoint,
                resource_id,
            } => self.delegate(identity, endpoint, resource_id).await,
        };

        let label = match &decision {
            Decision::Allow => "allow",
            Decision::Deny(DenyReason::PolicyEvaluationFailed) => "error",
            Decision::Deny(_) => "deny",
        };
        record_authz_decision(policy.kind(), label);

        if let Decision::Deny(reason) = &decision {
            tracing::info!(
                target: "rs.policy",
                policy = %policy,
                reason = reason.reason(),
                "Access denied"
            );
        }

        decision
    }

    async fn delegate(&self, identity: &Identity, endpoint: &str, resource_id: &str) -> Decision {
        let Some(evaluator) = &self.evaluator else {
            tracing::error!(
                target: "rs.policy",
                resource_id = %resource_id,
                "Delegated policy without a configured evaluator"
            );
            return Decision::Deny(DenyReason::PolicyEvaluationFailed);
        };

        match evaluator.evaluate(endpoint, resource_id, identity).await {
            Ok(true) => Decision::Allow,
            Ok(false) => Decision::Deny(DenyReason::PolicyDenied),
            Err(e) => {
                tracing::warn!(
                    target: "rs.policy",
                    resource_id = %resource_id,
                    error = %e,
                    "Delegated policy evaluation failed"
                );
                Decision::Deny(DenyReason::PolicyEvaluationFailed)
            }
        }
    }
}
