//! Per-request caller identity.
//!
//! Built from [`VerifiedClaims`] once verification succeeds and handed to
//! handlers as a request extension.

use crate::auth::claims::VerifiedClaims;
use crate::config::Config;
use common::secret::SecretString;
use serde_json::Value;
use std::collections::BTreeSet;

/// The authenticated caller.
///
/// The access token is kept only so delegated policy checks can act on the
/// caller's behalf; it is redacted in Debug output.
#[derive(Debug, Clone)]
pub struct Identity {
    principal: String,
    roles: BTreeSet<String>,
    claims: VerifiedClaims,
    access_token: SecretString,
}

impl Identity {
    /// Display name of the caller (`preferred_username` by default, else `sub`).
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Roles from the configured claim, plus client roles when configured.
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Exact, case-sensitive role membership.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// The verified claims the identity was derived from.
    pub fn claims(&self) -> &VerifiedClaims {
        &self.claims
    }

    /// The bearer token this identity was built from.
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }
}

/// Maps verified claims to an [`Identity`].
#[derive(Debug, Clone)]
pub struct IdentityBuilder {
    roles_claim: String,
    principal_claim: String,
    client_roles_from: Option<String>,
}

impl IdentityBuilder {
    /// # Arguments
    ///
    /// * `roles_claim` - Dotted path of the roles claim, e.g. `realm_access.roles`
    /// * `principal_claim` - Top-level claim holding the display name
    /// * `client_roles_from` - Client whose `resource_access.<client>.roles` are merged in
    pub fn new(
        roles_claim: impl Into<String>,
        principal_claim: impl Into<String>,
        client_roles_from: Option<String>,
    ) -> Self {
        Self {
            roles_claim: roles_claim.into(),
            principal_claim: principal_claim.into(),
            client_roles_from,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.roles_claim.clone(),
            config.principal_claim.clone(),
            config.client_roles_from.clone(),
        )
    }

    /// Build the identity. Never fails: absent or oddly shaped role claims
    /// yield an empty role set.
    pub fn build(&self, claims: VerifiedClaims, access_token: &str) -> Identity {
        let mut roles = BTreeSet::new();
        collect_roles(claims.get_path(&self.roles_claim), &mut roles);

        if let Some(client) = &self.client_roles_from {
            let client_roles = claims
                .get("resource_access")
                .and_then(|ra| ra.get(client.as_str()))
                .and_then(|c| c.get("roles"));
            collect_roles(client_roles, &mut roles);
        }

        let principal = claims
            .get(&self.principal_claim)
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .or_else(|| claims.subject())
            .unwrap_or_default()
            .to_string();

        Identity {
            principal,
            roles,
            claims,
            access_token: SecretString::from(access_token.to_string()),
        }
    }
}

/// Roles are either a JSON array of strings or one space-separated string.
fn collect_roles(value: Option<&Value>, roles: &mut BTreeSet<String>) {
    match value {
        Some(Value::Array(items)) => {
            roles.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
            );
        }
        Some(Value::String(s)) => {
            roles.extend(s.split_whitespace().map(str::to_string));
        }
        _ => {}
    }
}

/// Identities for unit tests in other modules.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_support {
    use super::*;
    use serde_json::json;

    pub(crate) fn identity_with_roles(roles: &[&str]) -> Identity {
        let claims = json!({
            "sub": "test-subject",
            "preferred_username": "alice",
            "realm_access": {"roles": roles}
        });
        let verified = VerifiedClaims::new(
            "https://keycloak.example.com/realms/quarkus".to_string(),
            vec!["backend-service".to_string()],
            1_900_000_000,
            claims.as_object().unwrap().clone(),
        );
        IdentityBuilder::new("realm_access.roles", "preferred_username", None)
            .build(verified, "test-access-token")
    }
}
