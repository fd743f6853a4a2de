//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for bearer tokens and client
//! credentials. Any struct that derives `Debug` and holds a `SecretString`
//! gets a redacted `Debug` for free, so an `Identity` carrying the caller's
//! access token can be logged with `{:?}` without leaking the token.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ForwardedCredential {
//!     principal: String,
//!     access_token: SecretString,
//! }
//!
//! let cred = ForwardedCredential {
//!     principal: "alice".to_string(),
//!     access_token: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! assert!(!format!("{cred:?}").contains("eyJhbGciOi"));
//!
//! // Reading the value is always an explicit, greppable call
//! let header = format!("Bearer {}", cred.access_token.expose_secret());
//! assert!(header.starts_with("Bearer "));
//! ```

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("eyJhbGciOiJSUzI1NiJ9.payload.sig");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("eyJhbGciOiJSUzI1NiJ9"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("token-value");
        assert_eq!(secret.expose_secret(), "token-value");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct Forwarded {
            principal: String,
            access_token: SecretString,
        }

        let forwarded = Forwarded {
            principal: "alice".to_string(),
            access_token: SecretString::from("super-secret-token"),
        };

        let debug_str = format!("{forwarded:?}");

        assert!(debug_str.contains("alice"));
        assert!(!debug_str.contains("super-secret-token"));
    }

    #[test]
    fn test_clone_keeps_value() {
        let secret = SecretString::from("cloneable");
        let cloned = secret.clone();
        assert_eq!(cloned.expose_secret(), "cloneable");
    }
}
