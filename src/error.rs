//! Error types for oidc-rp
//!
//! This module defines all error types used throughout the library,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for OIDC relying-party operations
///
/// This enum encompasses all possible errors that can occur during
/// provider discovery, key-set synchronization, token exchange, and
/// identity-token verification.
#[derive(Error, Debug)]
pub enum OidcError {
    /// Discovery document fetch or parse failure
    ///
    /// Non-fatal during periodic sync (the last good configuration is
    /// retained); fatal when the very first sync fails.
    #[error("Provider config fetch error: {0}")]
    ConfigFetch(String),

    /// Key endpoint fetch or JWKS parse failure
    ///
    /// Surfaced to the caller whose verification triggered the refresh;
    /// the cache remains at the last-known key set.
    #[error("Key set fetch error: {0}")]
    KeyFetch(String),

    /// The provider advertises no token-endpoint auth method this client
    /// implements
    #[error("no supported auth methods")]
    UnsupportedAuthMethod,

    /// The provider metadata does not list the requested grant type
    #[error("{0} grant type is not supported")]
    GrantTypeUnsupported(String),

    /// No verification key available after one refresh attempt
    #[error("no matching key")]
    NoMatchingKey,

    /// The token signature did not validate against any candidate key
    #[error("invalid signature")]
    InvalidSignature,

    /// A token claim did not match the configured expectation
    #[error("claim mismatch: {0}")]
    ClaimMismatch(String),

    /// Provider configuration missing or past its freshness deadline
    #[error("provider configuration {0}")]
    Unhealthy(String),

    /// Token endpoint returned an error or unparsable response
    #[error("Token exchange error: {0}")]
    TokenExchange(String),

    /// The token string is structurally invalid (not a JWT, bad base64,
    /// bad JSON claims)
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Client metadata (redirect URLs) failed validation
    #[error("Invalid client metadata: {0}")]
    InvalidClientMetadata(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for oidc-rp operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_fetch_error_display() {
        let error = OidcError::ConfigFetch("HTTP 503".to_string());
        assert_eq!(error.to_string(), "Provider config fetch error: HTTP 503");
    }

    #[test]
    fn test_key_fetch_error_display() {
        let error = OidcError::KeyFetch("connection refused".to_string());
        assert_eq!(error.to_string(), "Key set fetch error: connection refused");
    }

    #[test]
    fn test_unsupported_auth_method_display() {
        let error = OidcError::UnsupportedAuthMethod;
        assert_eq!(error.to_string(), "no supported auth methods");
    }

    #[test]
    fn test_grant_type_unsupported_display() {
        let error = OidcError::GrantTypeUnsupported("client_credentials".to_string());
        assert_eq!(
            error.to_string(),
            "client_credentials grant type is not supported"
        );
    }

    #[test]
    fn test_claim_mismatch_names_claim() {
        let error = OidcError::ClaimMismatch("aud".to_string());
        assert_eq!(error.to_string(), "claim mismatch: aud");
    }

    #[test]
    fn test_no_matching_key_display() {
        assert_eq!(OidcError::NoMatchingKey.to_string(), "no matching key");
    }

    #[test]
    fn test_invalid_signature_display() {
        assert_eq!(OidcError::InvalidSignature.to_string(), "invalid signature");
    }

    #[test]
    fn test_invalid_token_display() {
        let error = OidcError::InvalidToken("not a JWT".to_string());
        assert_eq!(error.to_string(), "Invalid token: not a JWT");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let error: OidcError = json_error.into();
        assert!(matches!(error, OidcError::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OidcError>();
    }
}
