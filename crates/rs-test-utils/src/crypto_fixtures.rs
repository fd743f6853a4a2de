//! Cryptographic fixtures for testing
//!
//! Provides signing keypairs that publish themselves as JWKs and sign
//! tokens with `jsonwebtoken`. Ed25519 keys are deterministic based on a
//! seed; P-256 keys are random per instance.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde_json::{json, Value};
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// Ed25519 keypair that signs EdDSA tokens.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestKeypair::new(1, "test-key-01")?;
/// let token = keypair.sign(&TestTokenBuilder::new().with_roles(&["user"]).build())?;
/// let jwks = jwks_json(&[keypair.jwk_json()]);
/// ```
pub struct TestKeypair {
    kid: String,
    public_key_bytes: Vec<u8>,
    private_key_pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// Create a keypair. The same seed always produces the same key.
    pub fn new(seed: u8, kid: &str) -> Result<Self, FixtureError> {
        let seed_bytes = seed_bytes(seed);

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e)))?;

        Ok(Self {
            kid: kid.to_string(),
            public_key_bytes: key_pair.public_key().as_ref().to_vec(),
            private_key_pkcs8: build_pkcs8_from_seed(&seed_bytes),
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Sign claims with a standard `{"alg":"EdDSA","typ":"JWT","kid":...}` header.
    pub fn sign(&self, claims: &Value) -> Result<String, FixtureError> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    /// Sign claims with a caller-supplied header (e.g. a different `kid`).
    pub fn sign_with_header(&self, header: &Header, claims: &Value) -> Result<String, FixtureError> {
        let encoding_key = EncodingKey::from_ed_der(&self.private_key_pkcs8);
        encode(header, claims, &encoding_key).map_err(|e| FixtureError::Signing(e.to_string()))
    }

    /// Public key as a JWK, the way Keycloak publishes an Ed25519 key.
    pub fn jwk_json(&self) -> Value {
        json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
            "alg": "EdDSA",
            "use": "sig"
        })
    }
}

/// P-256 keypair that signs ES256 tokens.
pub struct TestEcKeypair {
    kid: String,
    public_point: Vec<u8>,
    private_key_pkcs8: Vec<u8>,
}

impl TestEcKeypair {
    pub fn generate(kid: &str) -> Result<Self, FixtureError> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|e| FixtureError::Crypto(format!("Failed to generate P-256 key: {:?}", e)))?;
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .map_err(|e| FixtureError::Crypto(format!("Failed to load P-256 key: {:?}", e)))?;

        Ok(Self {
            kid: kid.to_string(),
            public_point: key_pair.public_key().as_ref().to_vec(),
            private_key_pkcs8: pkcs8.as_ref().to_vec(),
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn sign(&self, claims: &Value) -> Result<String, FixtureError> {
        let mut header = Header::new(Algorithm::ES256);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());

        let encoding_key = EncodingKey::from_ec_der(&self.private_key_pkcs8);
        encode(&header, claims, &encoding_key).map_err(|e| FixtureError::Signing(e.to_string()))
    }

    pub fn jwk_json(&self) -> Result<Value, FixtureError> {
        // Uncompressed SEC1 point: 0x04 || x || y
        let (x, y) = match self.public_point.split_first() {
            Some((&0x04, coords)) if coords.len() == 64 => coords.split_at(32),
            _ => return Err(FixtureError::Crypto("unexpected P-256 point encoding".to_string())),
        };

        Ok(json!({
            "kty": "EC",
            "kid": self.kid,
            "crv": "P-256",
            "x": URL_SAFE_NO_PAD.encode(x),
            "y": URL_SAFE_NO_PAD.encode(y),
            "alg": "ES256",
            "use": "sig"
        }))
    }
}

/// Wrap JWKs into a JWKS document.
pub fn jwks_json(keys: &[Value]) -> Value {
    json!({ "keys": keys })
}

/// Build an unsigned `alg: none` token carrying `claims`.
pub fn unsigned_token(kid: &str, claims: &Value) -> String {
    let header = json!({"alg": "none", "typ": "JWT", "kid": kid});
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// Change the first character of the signature segment.
///
/// The first character carries six full bits of the signature, so the
/// result still decodes but no longer verifies.
pub fn tamper_signature(token: &str) -> String {
    let Some(dot) = token.rfind('.') else {
        return token.to_string();
    };
    let (head, signature) = token.split_at(dot + 1);
    let mut chars = signature.chars();
    match chars.next() {
        Some(first) => {
            let replacement = if first == 'A' { 'B' } else { 'A' };
            format!("{}{}{}", head, replacement, chars.as_str())
        }
        None => token.to_string(),
    }
}

fn seed_bytes(seed: u8) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    seed_bytes
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// Ring doesn't expose PKCS#8 for a seeded Ed25519 keypair, so it is
/// assembled here (RFC 5208 / RFC 8410).
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // version INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // privateKey OCTET STRING { OCTET STRING seed }
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}
