//! Health and metrics endpoint integration tests.
//!
//! Tests the public endpoints using the `TestResourceServer` harness.

use rs_test_utils::TestResourceServer;

/// Test that health endpoint returns 200 and "OK".
#[tokio::test]
async fn test_health_endpoint_returns_ok() -> Result<(), anyhow::Error> {
    let server = TestResourceServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await?, "OK");

    Ok(())
}

/// Health does not depend on the issuer being reachable.
#[tokio::test]
async fn test_health_ignores_issuer_outage() -> Result<(), anyhow::Error> {
    let server = TestResourceServer::spawn().await?;
    server.mock_server().reset().await;

    let response = reqwest::get(format!("{}/health", server.url())).await?;

    assert_eq!(response.status(), 200);

    Ok(())
}

/// Test that non-existent routes return 404.
#[tokio::test]
async fn test_unknown_route_returns_404() -> Result<(), anyhow::Error> {
    let server = TestResourceServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/nonexistent", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), 404);

    Ok(())
}

/// Metrics are exposed in Prometheus text format.
#[tokio::test]
async fn test_metrics_endpoint_is_public() -> Result<(), anyhow::Error> {
    let server = TestResourceServer::spawn().await?;
    let client = reqwest::Client::new();

    // Generate at least one request before scraping
    client
        .get(format!("{}/health", server.url()))
        .send()
        .await?;

    let response = client
        .get(format!("{}/metrics", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), 200);

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    assert!(
        content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("text/plain")),
        "Expected Prometheus text format, got {:?}",
        content_type
    );

    Ok(())
}
