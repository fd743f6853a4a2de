//! HTTP boundary error type.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Messages returned to clients are intentionally generic: the precise
//! verification or authorization reason is logged and counted server-side,
//! never returned to the (untrusted) caller.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Realm advertised in `WWW-Authenticate` challenges.
const REALM: &str = "resource-server";

/// Resource server error type.
///
/// Maps to HTTP status codes:
/// - MissingCredentials, InvalidToken: 401 Unauthorized
/// - Forbidden: 403 Forbidden
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing bearer credentials")]
    MissingCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Forbidden")]
    Forbidden,
}

impl ApiError {
    /// RFC 6750 challenge for 401 responses.
    fn challenge(&self) -> Option<String> {
        match self {
            ApiError::MissingCredentials => Some(format!("Bearer realm=\"{}\"", REALM)),
            ApiError::InvalidToken => Some(format!(
                "Bearer realm=\"{}\", error=\"invalid_token\"",
                REALM
            )),
            ApiError::Forbidden => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::MissingCredentials => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication is required to access this resource",
            ),
            ApiError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "The access token is invalid or expired",
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Access to this resource is denied",
            ),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
            },
        };

        let challenge = self.challenge();
        let mut response = (status, Json(body)).into_response();

        if let Some(value) = challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    // Helper function to read the response body as JSON
    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display() {
        assert_eq!(ApiError::InvalidToken.to_string(), "Invalid token");
        assert_eq!(ApiError::Forbidden.to_string(), "Forbidden");
    }

    #[tokio::test]
    async fn test_into_response_missing_credentials() {
        let response = ApiError::MissingCredentials.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let www_auth = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(www_auth, "Bearer realm=\"resource-server\"");

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_into_response_invalid_token() {
        let response = ApiError::InvalidToken.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let www_auth = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(www_auth.contains("error=\"invalid_token\""));

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INVALID_TOKEN");
        assert_eq!(
            body_json["error"]["message"],
            "The access token is invalid or expired"
        );
    }

    #[tokio::test]
    async fn test_into_response_forbidden_has_no_challenge() {
        let response = ApiError::Forbidden.into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "FORBIDDEN");
    }
}
