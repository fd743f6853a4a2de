//! HTTP metrics middleware for capturing all request/response metrics
//!
//! Applied as the outermost layer so that gate rejections (401/403) and
//! framework-level errors (404, 405) are counted along with handler responses.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Middleware that records method, normalized path, status and duration.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use tower::ServiceExt;

    async fn handler_200() -> &'static str {
        "OK"
    }

    async fn handler_403() -> (StatusCode, &'static str) {
        (StatusCode::FORBIDDEN, "Forbidden")
    }

    fn test_app() -> Router {
        Router::new()
            .route("/health", get(handler_200))
            .route("/api/admin", get(handler_403))
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    async fn status_of(uri: &str) -> StatusCode {
        let request = HttpRequest::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("request builder should succeed");

        test_app()
            .oneshot(request)
            .await
            .expect("request should succeed")
            .status()
    }

    #[tokio::test]
    async fn test_middleware_passes_responses_through() {
        assert_eq!(status_of("/health").await, StatusCode::OK);
        assert_eq!(status_of("/api/admin").await, StatusCode::FORBIDDEN);
        assert_eq!(status_of("/nonexistent").await, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_middleware_records_counter() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                status_of("/api/admin").await;
                status_of("/nonexistent").await;
            });
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let counted = |endpoint: &str, code: &str| {
            snapshot.iter().any(|(key, _, _, value)| {
                let key = key.key();
                key.name() == "rs_http_requests_total"
                    && key.labels().any(|l| l.key() == "endpoint" && l.value() == endpoint)
                    && key.labels().any(|l| l.key() == "status_code" && l.value() == code)
                    && matches!(value, DebugValue::Counter(1))
            })
        };

        assert!(counted("/api/admin", "403"));
        assert!(counted("/other", "404"));
    }
}
