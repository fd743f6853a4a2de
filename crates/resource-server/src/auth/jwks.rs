//! JWKS client for fetching and caching the issuer's signing keys.
//!
//! The client fetches the Authorization Server's JSON Web Key Set (for
//! Keycloak: `/realms/<realm>/protocol/openid-connect/certs`), converts every
//! usable entry into an immutable [`SigningKey`] and caches the whole set with
//! a TTL.
//!
//! # Security
//!
//! - Keys are only ever taken from the configured JWKS URL (validated as
//!   HTTPS or loopback at startup)
//! - The cache is replaced as a whole on refresh, never patched
//! - Unknown key IDs trigger at most one refresh per lookup, and refreshes
//!   caused by unknown key IDs are rate limited
//! - Fetch failures never fall back to stale or absent keys: the lookup fails

use crate::observability::metrics::record_jwks_refresh;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default cache TTL in seconds (5 minutes).
const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// Default HTTP timeout for a JWKS fetch.
const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 5;

/// Default minimum spacing between refreshes caused by unknown key IDs.
const DEFAULT_MIN_REFRESH_INTERVAL_SECONDS: u64 = 10;

/// Key resolution failures. Both fail the surrounding verification closed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyResolutionError {
    /// The key ID is not in the (freshly fetched) key set.
    #[error("signing key not found")]
    KeyNotFound,

    /// The key set could not be fetched or parsed.
    #[error("failed to fetch key set: {0}")]
    FetchError(String),
}

/// JSON Web Key as published in a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type: "RSA", "EC" or "OKP".
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm the key is pinned to, if any.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use ("sig" or "enc").
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// Curve name for EC / OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate, or the Ed25519 public key (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    /// List of JSON Web Keys.
    pub keys: Vec<Jwk>,
}

/// A verification key taken from the trusted key set.
///
/// Immutable once built; a refresh produces new `SigningKey` values rather
/// than touching existing ones, so a key handed to a verification can never
/// change underneath it.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithms: Vec<Algorithm>,
    decoding_key: DecodingKey,
    fetched_at: Instant,
}

impl SigningKey {
    /// Key ID.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithms this key may verify. A JWK with `alg` pins exactly one.
    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    /// Whether a token signed with `alg` may be verified with this key.
    pub fn supports(&self, alg: Algorithm) -> bool {
        self.algorithms.contains(&alg)
    }

    /// Key material for `jsonwebtoken`.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// When the key set containing this key was fetched.
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Build a signing key from a JWK.
    ///
    /// Returns a human-readable reason when the JWK cannot be used for
    /// signature verification; such keys are skipped, not fatal.
    pub fn from_jwk(jwk: &Jwk, fetched_at: Instant) -> Result<Self, String> {
        let kid = jwk
            .kid
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| "missing kid".to_string())?;

        if let Some(key_use) = &jwk.key_use {
            if key_use != "sig" {
                return Err(format!("key use '{}' is not 'sig'", key_use));
            }
        }

        let (decoding_key, family) = match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk.n.as_deref().ok_or("RSA key missing n")?;
                let e = jwk.e.as_deref().ok_or("RSA key missing e")?;
                let key = DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| format!("invalid RSA components: {}", e))?;
                (
                    key,
                    vec![
                        Algorithm::RS256,
                        Algorithm::RS384,
                        Algorithm::RS512,
                        Algorithm::PS256,
                        Algorithm::PS384,
                        Algorithm::PS512,
                    ],
                )
            }
            "EC" => {
                let alg = match jwk.crv.as_deref() {
                    Some("P-256") => Algorithm::ES256,
                    Some("P-384") => Algorithm::ES384,
                    other => return Err(format!("unsupported EC curve {:?}", other)),
                };
                let x = jwk.x.as_deref().ok_or("EC key missing x")?;
                let y = jwk.y.as_deref().ok_or("EC key missing y")?;
                let key = DecodingKey::from_ec_components(x, y)
                    .map_err(|e| format!("invalid EC components: {}", e))?;
                (key, vec![alg])
            }
            "OKP" => {
                if jwk.crv.as_deref() != Some("Ed25519") {
                    return Err(format!("unsupported OKP curve {:?}", jwk.crv));
                }
                let x = jwk.x.as_deref().ok_or("OKP key missing x")?;
                let key = DecodingKey::from_ed_components(x)
                    .map_err(|e| format!("invalid Ed25519 key: {}", e))?;
                (key, vec![Algorithm::EdDSA])
            }
            other => return Err(format!("unsupported key type '{}'", other)),
        };

        let algorithms = match &jwk.alg {
            Some(name) => {
                let alg = Algorithm::from_str(name)
                    .map_err(|_| format!("unknown algorithm '{}'", name))?;
                if !family.contains(&alg) {
                    return Err(format!("algorithm '{}' does not match key type '{}'", name, jwk.kty));
                }
                vec![alg]
            }
            None => family,
        };

        Ok(Self {
            kid,
            algorithms,
            decoding_key,
            fetched_at,
        })
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithms", &self.algorithms)
            .field("fetched_at", &self.fetched_at)
            .finish_non_exhaustive()
    }
}

/// Tuning knobs for [`JwksClient`].
#[derive(Debug, Clone, Copy)]
pub struct JwksSettings {
    /// How long a fetched key set is used before it is refreshed.
    pub cache_ttl: Duration,

    /// Upper bound for a single fetch.
    pub fetch_timeout: Duration,

    /// Minimum age of a fresh key set before an unknown kid may refresh it again.
    pub min_refresh_interval: Duration,
}

impl Default for JwksSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECONDS),
            min_refresh_interval: Duration::from_secs(DEFAULT_MIN_REFRESH_INTERVAL_SECONDS),
        }
    }
}

/// Cached key set with expiry time.
struct CachedJwks {
    /// Map of key ID to signing key.
    keys: HashMap<String, Arc<SigningKey>>,

    /// When the set was fetched.
    fetched_at: Instant,

    /// When this cache entry expires.
    expires_at: Instant,
}

impl CachedJwks {
    fn is_fresh(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// JWKS client for fetching and caching signing keys.
///
/// Thread-safe; share it behind an `Arc`. Cache hits only take the read lock.
/// Refreshes serialize on a separate mutex so that a burst of lookups on a
/// cold or expired cache results in a single fetch whose result, success or
/// failure, every waiter observes.
pub struct JwksClient {
    /// URL to the JWKS endpoint.
    jwks_url: String,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,

    /// Cached key set.
    cache: RwLock<Option<CachedJwks>>,

    /// Serializes refreshes; holds the error of the last attempt, if it failed.
    refresh_lock: Mutex<Option<KeyResolutionError>>,

    /// Bumped after every refresh attempt, successful or not. Lets waiters
    /// see that someone else refreshed while they queued for the lock.
    refresh_attempts: AtomicU64,

    settings: JwksSettings,
}

impl JwksClient {
    /// Create a new JWKS client with default settings.
    ///
    /// # Arguments
    ///
    /// * `jwks_url` - URL to the issuer's JWKS endpoint
    pub fn new(jwks_url: String) -> Self {
        Self::with_settings(jwks_url, JwksSettings::default())
    }

    /// Create a new JWKS client with custom cache and timeout settings.
    pub fn with_settings(jwks_url: String, settings: JwksSettings) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(settings.fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "rs.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(None),
            refresh_attempts: AtomicU64::new(0),
            settings,
        }
    }

    /// The JWKS endpoint this client trusts.
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Resolve a signing key by key ID.
    ///
    /// Returns the cached key when the cache is fresh, otherwise refreshes the
    /// key set (at most once) and looks again.
    ///
    /// # Errors
    ///
    /// Returns `KeyResolutionError::FetchError` if the key set cannot be fetched.
    /// Returns `KeyResolutionError::KeyNotFound` if the key ID is not in the set.
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<SigningKey>, KeyResolutionError> {
        let observed_attempt = self.refresh_attempts.load(Ordering::Acquire);

        // Check cache first
        {
            let cache = self.cache.read().await;
            if let Some(key) = cache
                .as_ref()
                .filter(|c| c.is_fresh())
                .and_then(|c| c.keys.get(kid))
            {
                tracing::debug!(target: "rs.auth.jwks", kid = %kid, "JWKS cache hit");
                return Ok(Arc::clone(key));
            }
        }

        let mut last_error = self.refresh_lock.lock().await;

        // Someone else refreshed while we waited for the lock; share their outcome
        if self.refresh_attempts.load(Ordering::Acquire) != observed_attempt {
            if let Some(err) = last_error.as_ref() {
                tracing::debug!(target: "rs.auth.jwks", kid = %kid, "Sharing failed JWKS refresh");
                return Err(err.clone());
            }
            let cache = self.cache.read().await;
            return match cache.as_ref() {
                Some(cached) => lookup(cached, kid),
                None => Err(KeyResolutionError::KeyNotFound),
            };
        }

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh()) {
                if cached.fetched_at.elapsed() < self.settings.min_refresh_interval {
                    tracing::warn!(
                        target: "rs.auth.jwks",
                        kid = %kid,
                        "Unknown kid against recently fetched JWKS, not refreshing"
                    );
                    return Err(KeyResolutionError::KeyNotFound);
                }
            }
        }

        // Cache miss or expired - fetch fresh JWKS
        self.refresh_cache(&mut last_error).await?;

        let cache = self.cache.read().await;
        match cache.as_ref() {
            Some(cached) => lookup(cached, kid),
            None => Err(KeyResolutionError::KeyNotFound),
        }
    }

    /// Fetch the key set and replace the cache.
    ///
    /// Also used at startup to warm the cache.
    pub async fn force_refresh(&self) -> Result<usize, KeyResolutionError> {
        let mut last_error = self.refresh_lock.lock().await;
        self.refresh_cache(&mut last_error).await
    }

    /// Refresh the cache. Callers must hold `refresh_lock`.
    #[instrument(skip_all)]
    async fn refresh_cache(
        &self,
        last_error: &mut Option<KeyResolutionError>,
    ) -> Result<usize, KeyResolutionError> {
        let result = self.fetch_keys().await;
        record_jwks_refresh(if result.is_ok() { "success" } else { "error" });

        let keys = match result {
            Ok(keys) => keys,
            Err(e) => {
                *last_error = Some(e.clone());
                self.refresh_attempts.fetch_add(1, Ordering::Release);
                return Err(e);
            }
        };
        let key_count = keys.len();

        let now = Instant::now();
        *self.cache.write().await = Some(CachedJwks {
            keys,
            fetched_at: now,
            expires_at: now + self.settings.cache_ttl,
        });
        *last_error = None;
        let attempt = self
            .refresh_attempts
            .fetch_add(1, Ordering::Release)
            .wrapping_add(1);

        tracing::info!(
            target: "rs.auth.jwks",
            key_count,
            attempt,
            "JWKS cache refreshed"
        );

        Ok(key_count)
    }

    async fn fetch_keys(&self) -> Result<HashMap<String, Arc<SigningKey>>, KeyResolutionError> {
        tracing::debug!(target: "rs.auth.jwks", url = %self.jwks_url, "Fetching JWKS");

        let fetch = async {
            let response = self
                .http_client
                .get(&self.jwks_url)
                .send()
                .await
                .map_err(|e| {
                    tracing::error!(target: "rs.auth.jwks", error = %e, "Failed to fetch JWKS");
                    KeyResolutionError::FetchError(format!("request failed: {}", e))
                })?;

            if !response.status().is_success() {
                tracing::error!(
                    target: "rs.auth.jwks",
                    status = %response.status(),
                    "JWKS endpoint returned error"
                );
                return Err(KeyResolutionError::FetchError(format!(
                    "unexpected status {}",
                    response.status()
                )));
            }

            response.json::<JwkSet>().await.map_err(|e| {
                tracing::error!(target: "rs.auth.jwks", error = %e, "Failed to parse JWKS response");
                KeyResolutionError::FetchError(format!("malformed key set: {}", e))
            })
        };

        // The client timeout already bounds the call; this also covers a
        // client that fell back to defaults
        let jwks = tokio::time::timeout(self.settings.fetch_timeout, fetch)
            .await
            .map_err(|_| {
                tracing::error!(target: "rs.auth.jwks", "JWKS fetch timed out");
                KeyResolutionError::FetchError("timed out".to_string())
            })??;

        let fetched_at = Instant::now();
        let mut keys = HashMap::new();
        for jwk in &jwks.keys {
            match SigningKey::from_jwk(jwk, fetched_at) {
                Ok(key) => {
                    keys.insert(key.kid().to_string(), Arc::new(key));
                }
                Err(reason) => {
                    tracing::warn!(
                        target: "rs.auth.jwks",
                        kid = ?jwk.kid,
                        kty = %jwk.kty,
                        reason = %reason,
                        "Skipping unusable JWK"
                    );
                }
            }
        }

        if keys.is_empty() {
            tracing::error!(target: "rs.auth.jwks", "JWKS contains no usable signing keys");
            return Err(KeyResolutionError::FetchError(
                "no usable signing keys".to_string(),
            ));
        }

        Ok(keys)
    }
}

fn lookup(cached: &CachedJwks, kid: &str) -> Result<Arc<SigningKey>, KeyResolutionError> {
    match cached.keys.get(kid) {
        Some(key) => Ok(Arc::clone(key)),
        None => {
            tracing::warn!(target: "rs.auth.jwks", kid = %kid, "Key not found in JWKS");
            Err(KeyResolutionError::KeyNotFound)
        }
    }
}
