//! JWKS client integration tests.
//!
//! Exercises fetching, caching and refresh coalescing against a mocked
//! issuer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use futures::future::join_all;
use resource_server::auth::{JwksClient, JwksSettings, KeyResolutionError};
use rs_test_utils::{jwks_json, TestKeypair, JWKS_PATH};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(cache_ttl: Duration, min_refresh_interval: Duration) -> JwksSettings {
    JwksSettings {
        cache_ttl,
        fetch_timeout: Duration::from_secs(2),
        min_refresh_interval,
    }
}

fn client_for(mock_server: &MockServer, settings: JwksSettings) -> JwksClient {
    JwksClient::with_settings(format!("{}{}", mock_server.uri(), JWKS_PATH), settings)
}

/// Many lookups racing on a cold cache trigger exactly one fetch.
#[tokio::test]
async fn test_concurrent_cold_cache_lookups_fetch_once() -> Result<()> {
    let mock_server = MockServer::start().await;
    let keypair = TestKeypair::new(1, "test-key-01")?;

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks_json(&[keypair.jwk_json()]))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Arc::new(client_for(&mock_server, JwksSettings::default()));

    let lookups = (0..16).map(|_| {
        let client = Arc::clone(&client);
        async move { client.get_key("test-key-01").await }
    });
    let results = join_all(lookups).await;

    for result in results {
        assert_eq!(result.unwrap().kid(), "test-key-01");
    }

    // expect(1) is verified when the mock server drops
    Ok(())
}

/// Concurrent lookups from separate tasks also share one fetch.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_share_one_fetch() -> Result<()> {
    let mock_server = MockServer::start().await;
    let keypair = TestKeypair::new(1, "test-key-01")?;

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks_json(&[keypair.jwk_json()]))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Arc::new(client_for(&mock_server, JwksSettings::default()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get_key("test-key-01").await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await?.is_ok());
    }

    Ok(())
}

/// Lookups queued behind a failing fetch share its error instead of
/// fetching again one after another.
#[tokio::test]
async fn test_concurrent_lookups_share_failed_fetch() -> Result<()> {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Arc::new(client_for(&mock_server, JwksSettings::default()));

    let started = std::time::Instant::now();
    let lookups = (0..8).map(|_| {
        let client = Arc::clone(&client);
        async move { client.get_key("test-key-01").await }
    });
    let results = join_all(lookups).await;

    for result in results {
        assert!(matches!(result, Err(KeyResolutionError::FetchError(_))));
    }
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "waiters fetched serially: {:?}",
        started.elapsed()
    );

    Ok(())
}

/// A failed fetch is not remembered: the next lookup tries again.
#[tokio::test]
async fn test_lookup_after_failed_fetch_retries() -> Result<()> {
    let mock_server = MockServer::start().await;
    let keypair = TestKeypair::new(1, "test-key-01")?;

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[keypair.jwk_json()])))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, JwksSettings::default());

    assert!(client.get_key("test-key-01").await.is_err());
    assert!(client.get_key("test-key-01").await.is_ok());

    Ok(())
}

/// Cache hits do not touch the network.
#[tokio::test]
async fn test_cached_key_is_reused() -> Result<()> {
    let mock_server = MockServer::start().await;
    let keypair = TestKeypair::new(1, "test-key-01")?;

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[keypair.jwk_json()])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, JwksSettings::default());

    let first = client.get_key("test-key-01").await.unwrap();
    let second = client.get_key("test-key-01").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));

    Ok(())
}

/// An expired cache is refreshed on the next lookup.
#[tokio::test]
async fn test_expired_cache_is_refreshed() -> Result<()> {
    let mock_server = MockServer::start().await;
    let keypair = TestKeypair::new(1, "test-key-01")?;

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[keypair.jwk_json()])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client_for(
        &mock_server,
        settings(Duration::from_millis(100), Duration::ZERO),
    );

    let first = client.get_key("test-key-01").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = client.get_key("test-key-01").await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.fetched_at() > first.fetched_at());

    Ok(())
}

/// A rotated-in key is picked up once the refresh interval has passed.
#[tokio::test]
async fn test_unknown_kid_refreshes_after_min_interval() -> Result<()> {
    let mock_server = MockServer::start().await;
    let old_key = TestKeypair::new(1, "key-2024")?;
    let new_key = TestKeypair::new(2, "key-2025")?;

    let client = client_for(
        &mock_server,
        settings(Duration::from_secs(300), Duration::from_millis(100)),
    );

    // Only the old key is published at first
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[old_key.jwk_json()])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[
            old_key.jwk_json(),
            new_key.jwk_json(),
        ])))
        .mount(&mock_server)
        .await;

    assert!(client.get_key("key-2024").await.is_ok());

    // Immediately after a fetch an unknown kid does not refresh again
    assert!(matches!(
        client.get_key("key-2025").await,
        Err(KeyResolutionError::KeyNotFound)
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;

    let key = client.get_key("key-2025").await.unwrap();
    assert_eq!(key.kid(), "key-2025");

    Ok(())
}

/// Unknown kids cannot be used to hammer the issuer.
#[tokio::test]
async fn test_unknown_kid_refresh_is_rate_limited() -> Result<()> {
    let mock_server = MockServer::start().await;
    let keypair = TestKeypair::new(1, "test-key-01")?;

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[keypair.jwk_json()])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, JwksSettings::default());

    for i in 0..10 {
        let result = client.get_key(&format!("unknown-{}", i)).await;
        assert!(matches!(result, Err(KeyResolutionError::KeyNotFound)));
    }

    Ok(())
}

#[tokio::test]
async fn test_fetch_timeout_is_fetch_error() -> Result<()> {
    let mock_server = MockServer::start().await;
    let keypair = TestKeypair::new(1, "test-key-01")?;

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks_json(&[keypair.jwk_json()]))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let client = client_for(
        &mock_server,
        JwksSettings {
            fetch_timeout: Duration::from_millis(200),
            ..JwksSettings::default()
        },
    );

    let result = client.get_key("test-key-01").await;
    assert!(matches!(result, Err(KeyResolutionError::FetchError(_))));

    Ok(())
}

#[tokio::test]
async fn test_malformed_jwks_is_fetch_error() -> Result<()> {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, JwksSettings::default());

    let result = client.get_key("test-key-01").await;
    assert!(matches!(result, Err(KeyResolutionError::FetchError(_))));

    Ok(())
}

#[tokio::test]
async fn test_server_error_is_fetch_error() -> Result<()> {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, JwksSettings::default());

    let result = client.force_refresh().await;
    assert!(matches!(result, Err(KeyResolutionError::FetchError(_))));

    Ok(())
}

/// A failed refresh leaves previously cached keys untouched.
#[tokio::test]
async fn test_failed_refresh_keeps_cached_keys() -> Result<()> {
    let mock_server = MockServer::start().await;
    let keypair = TestKeypair::new(1, "test-key-01")?;

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[keypair.jwk_json()])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, JwksSettings::default());

    assert_eq!(client.force_refresh().await.unwrap(), 1);
    assert!(client.force_refresh().await.is_err());
    assert!(client.get_key("test-key-01").await.is_ok());

    Ok(())
}

/// Keys of unsupported types are skipped; the rest of the set still loads.
#[tokio::test]
async fn test_unusable_keys_are_skipped() -> Result<()> {
    let mock_server = MockServer::start().await;
    let keypair = TestKeypair::new(1, "test-key-01")?;

    let mut jwks = jwks_json(&[keypair.jwk_json()]);
    jwks["keys"]
        .as_array_mut()
        .unwrap()
        .push(serde_json::json!({"kty": "oct", "kid": "hmac", "k": "c2VjcmV0"}));

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, JwksSettings::default());

    assert_eq!(client.force_refresh().await.unwrap(), 1);
    assert!(matches!(
        client.get_key("hmac").await,
        Err(KeyResolutionError::KeyNotFound)
    ));

    Ok(())
}
