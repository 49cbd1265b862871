//! JWT parsing for OIDC identity tokens
//!
//! This module provides a thin wrapper around a raw JWT string together
//! with its decoded header and (unverified) claims.  Parsing performs no
//! signature validation; that is the job of
//! [`JwtVerifier`](crate::verify::JwtVerifier), which needs the header's
//! key-ID and algorithm before it can pick a verification key.

use std::collections::HashMap;

use base64::Engine as _;
use jsonwebtoken::{decode_header, Algorithm, Header};
use serde::{Deserialize, Serialize};

use crate::error::{OidcError, Result};

/// OIDC identity-token claims
///
/// Standard claims are modelled explicitly; everything else lands in
/// `custom`.  The audience claim accepts both the single-string and the
/// array form permitted by the JWT specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    #[serde(default)]
    pub iss: String,

    /// Subject
    #[serde(default)]
    pub sub: String,

    /// Audience (can be string or array)
    #[serde(default, deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    /// Expiration time (seconds since epoch)
    #[serde(default)]
    pub exp: Option<i64>,

    /// Issued at (seconds since epoch)
    #[serde(default)]
    pub iat: Option<i64>,

    /// Not before (seconds since epoch)
    #[serde(default)]
    pub nbf: Option<i64>,

    /// Additional claims
    #[serde(flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

/// Deserialize audience as either a string or an array of strings
fn deserialize_audience<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct AudienceVisitor;

    impl<'de> Visitor<'de> for AudienceVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("string or array of strings")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Vec<String>, E>
        where
            E: de::Error,
        {
            Ok(vec![value.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Vec<String>, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut values = Vec::new();
            while let Some(value) = seq.next_element()? {
                values.push(value);
            }
            Ok(values)
        }
    }

    deserializer.deserialize_any(AudienceVisitor)
}

/// A parsed (but not yet verified) JWT
///
/// Holds the raw compact serialization alongside the decoded header and
/// claims.  The claims are extracted without signature validation so the
/// verifier can select keys by the header's `kid` before checking the
/// signature.
///
/// # Examples
///
/// ```
/// use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
/// use oidc_rp::Jwt;
///
/// let mut header = Header::new(Algorithm::HS256);
/// header.kid = Some("k1".to_string());
/// let claims = serde_json::json!({
///     "iss": "https://issuer.example.com",
///     "aud": "my-client",
///     "exp": 2_000_000_000,
/// });
/// let raw = encode(&header, &claims, &EncodingKey::from_secret(b"secret")).unwrap();
///
/// let jwt = Jwt::parse(raw).unwrap();
/// assert_eq!(jwt.key_id(), Some("k1"));
/// assert_eq!(jwt.claims().iss, "https://issuer.example.com");
/// assert_eq!(jwt.claims().aud, vec!["my-client".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct Jwt {
    raw: String,
    header: Header,
    claims: Claims,
}

impl Jwt {
    /// Parses a compact JWT serialization into header and claims.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::InvalidToken`] if the string is not a
    /// three-part JWT, the header is malformed, or the claims are not
    /// valid base64url-encoded JSON.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();

        let header = decode_header(&raw)
            .map_err(|e| OidcError::InvalidToken(format!("invalid JWT header: {}", e)))?;

        let claims = extract_unverified_claims(&raw)?;

        Ok(Self {
            raw,
            header,
            claims,
        })
    }

    /// The raw compact serialization.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The `kid` header parameter, if the token declares one.
    pub fn key_id(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// The signing algorithm declared in the token header.
    pub fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    /// The unverified claims.
    ///
    /// Callers must run the token through a verifier before trusting any
    /// of these values.
    pub fn claims(&self) -> &Claims {
        &self.claims
    }
}

/// Extract claims without verifying the signature (needed for key selection)
fn extract_unverified_claims(token: &str) -> Result<Claims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(OidcError::InvalidToken("invalid JWT format".to_string()).into());
    }

    let payload = base64_url_decode(parts[1])?;
    let claims: Claims = serde_json::from_slice(&payload)
        .map_err(|e| OidcError::InvalidToken(format!("invalid JWT claims: {}", e)))?;

    Ok(claims)
}

/// Base64 URL decode, tolerating both padded and unpadded input
fn base64_url_decode(input: &str) -> Result<Vec<u8>> {
    use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};

    URL_SAFE_NO_PAD
        .decode(input)
        .or_else(|_| URL_SAFE.decode(input))
        .map_err(|e| OidcError::InvalidToken(format!("invalid base64: {}", e)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey};

    fn sign(claims: &serde_json::Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &EncodingKey::from_secret(b"test-secret")).unwrap()
    }

    // -----------------------------------------------------------------------
    // parse()
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_extracts_header_and_claims() {
        let raw = sign(
            &serde_json::json!({
                "iss": "https://issuer.example.com",
                "sub": "user-1",
                "aud": "client-1",
                "exp": 2_000_000_000i64,
            }),
            Some("key-1"),
        );

        let jwt = Jwt::parse(raw).unwrap();
        assert_eq!(jwt.key_id(), Some("key-1"));
        assert_eq!(jwt.algorithm(), Algorithm::HS256);
        assert_eq!(jwt.claims().iss, "https://issuer.example.com");
        assert_eq!(jwt.claims().sub, "user-1");
        assert_eq!(jwt.claims().exp, Some(2_000_000_000));
    }

    #[test]
    fn test_parse_without_kid() {
        let raw = sign(&serde_json::json!({"iss": "i", "aud": "a"}), None);
        let jwt = Jwt::parse(raw).unwrap();
        assert!(jwt.key_id().is_none());
    }

    #[test]
    fn test_parse_rejects_non_jwt() {
        let result = Jwt::parse("not-a-jwt");
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("Invalid token"), "unexpected error: {msg}");
    }

    #[test]
    fn test_parse_rejects_two_part_token() {
        assert!(Jwt::parse("aGVhZGVy.cGF5bG9hZA").is_err());
    }

    #[test]
    fn test_parse_rejects_garbage_payload() {
        // Valid header, garbage payload, garbage signature.
        let raw = sign(&serde_json::json!({"iss": "i"}), None);
        let header = raw.split('.').next().unwrap();
        let token = format!("{header}.!!!.sig");
        assert!(Jwt::parse(token).is_err());
    }

    // -----------------------------------------------------------------------
    // Audience deserialization
    // -----------------------------------------------------------------------

    #[test]
    fn test_audience_accepts_single_string() {
        let raw = sign(&serde_json::json!({"aud": "one-client"}), None);
        let jwt = Jwt::parse(raw).unwrap();
        assert_eq!(jwt.claims().aud, vec!["one-client".to_string()]);
    }

    #[test]
    fn test_audience_accepts_array() {
        let raw = sign(&serde_json::json!({"aud": ["a", "b"]}), None);
        let jwt = Jwt::parse(raw).unwrap();
        assert_eq!(jwt.claims().aud, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_audience_defaults_to_empty() {
        let raw = sign(&serde_json::json!({"iss": "i"}), None);
        let jwt = Jwt::parse(raw).unwrap();
        assert!(jwt.claims().aud.is_empty());
    }

    // -----------------------------------------------------------------------
    // Custom claims
    // -----------------------------------------------------------------------

    #[test]
    fn test_custom_claims_are_preserved() {
        let raw = sign(&serde_json::json!({"iss": "i", "email": "a@b.c"}), None);
        let jwt = Jwt::parse(raw).unwrap();
        assert_eq!(
            jwt.claims().custom.get("email"),
            Some(&serde_json::Value::String("a@b.c".to_string()))
        );
    }
}
