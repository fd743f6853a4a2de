//! Current user handler.
//!
//! Returns who the caller is, as established by the request gate.

use crate::auth::Identity;
use axum::{Extension, Json};
use serde::Serialize;
use tracing::instrument;

/// Response for `/api/users/me`.
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    /// Principal name (`preferred_username`, else `sub`).
    pub user_name: String,

    /// Roles, sorted.
    pub roles: Vec<String>,
}

impl From<&Identity> for UserResponse {
    fn from(identity: &Identity) -> Self {
        Self {
            user_name: identity.principal().to_string(),
            roles: identity.roles().iter().cloned().collect(),
        }
    }
}

/// Handler for GET /api/users/me
///
/// Requires the `user` role.
///
/// ## Response
///
/// ```json
/// {
///   "user_name": "alice",
///   "roles": ["admin", "user"]
/// }
/// ```
#[instrument(skip_all, name = "rs.handlers.users.me")]
pub async fn get_me(Extension(identity): Extension<Identity>) -> Json<UserResponse> {
    Json(UserResponse::from(&identity))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::identity::test_support::identity_with_roles;

    #[tokio::test]
    async fn test_get_me_returns_principal_and_roles() {
        let identity = identity_with_roles(&["user", "admin"]);

        let Json(response) = get_me(Extension(identity)).await;

        assert_eq!(response.user_name, "alice");
        assert_eq!(response.roles, vec!["admin".to_string(), "user".to_string()]);
    }

    #[test]
    fn test_user_response_serialization() {
        let response = UserResponse::from(&identity_with_roles(&["user"]));
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["user_name"], "alice");
        assert_eq!(json["roles"], serde_json::json!(["user"]));
        assert!(json.get("access_token").is_none());
    }
}
