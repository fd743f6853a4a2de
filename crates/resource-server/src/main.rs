//! Resource Server
//!
//! Serves the protected API, enforcing bearer-token authentication and
//! per-route access policies against an external OpenID Connect issuer.

use resource_server::auth::discovery::discover_jwks_url;
use resource_server::config::Config;
use resource_server::observability::metrics::init_metrics_recorder;
use resource_server::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; RS_LOG_FORMAT=json switches to structured output
    let json_logs = std::env::var("RS_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let (json_layer, text_layer) = if json_logs {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resource_server=debug,tower_http=debug".into()),
        )
        .with(json_layer)
        .with(text_layer)
        .init();

    info!("Starting Resource Server");

    // Metrics recorder must exist before anything records
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        issuer = %config.issuer_url,
        audience = %config.audience,
        jwt_clock_skew_seconds = config.jwt_clock_skew.as_secs(),
        delegated_policy = config.policy_endpoint_url.is_some(),
        "Configuration loaded successfully"
    );

    // Resolve the JWKS URL, via discovery if not configured
    let jwks_url = match &config.jwks_url {
        Some(url) => url.clone(),
        None => {
            let client = reqwest::Client::builder()
                .timeout(config.jwks_fetch_timeout)
                .build()?;
            discover_jwks_url(&config.issuer_url, &client)
                .await
                .map_err(|e| {
                    error!("OIDC discovery failed: {}", e);
                    e
                })?
        }
    };
    info!(jwks_url = %jwks_url, "Using JWKS endpoint");

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::new(config, jwks_url));

    // Warm the key cache; a failure here is retried on the first request
    match state.jwks_client.force_refresh().await {
        Ok(key_count) => info!(key_count, "Signing keys loaded"),
        Err(e) => warn!("Initial JWKS fetch failed, will retry on demand: {}", e),
    }

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Resource Server listening on {}", addr);

    // Start server with graceful shutdown support
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Resource Server shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and drain period is complete.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    // Graceful shutdown drain period
    let drain_secs: u64 = std::env::var("RS_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (RS_DRAIN_SECONDS=0)");
    }
}
