//! Identity-token verification
//!
//! [`JwtVerifier`] drives verification as three ordered steps: select
//! candidate keys (by `kid` when the token declares one, all usable keys
//! otherwise), validate the signature against the candidates, then
//! validate the claims.  When key selection comes up empty the verifier
//! asks its [`KeySource`] for one refresh and retries the selection once;
//! a signature that fails against a present key is rejected outright with
//! no refresh, since re-fetching cannot make a bad signature good.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, Validation};
use tracing::debug;

use crate::error::{OidcError, Result};
use crate::jwt::{Claims, Jwt};
use crate::keys::PublicKey;

/// Source of verification keys with an on-demand refresh hook
///
/// The client facade wires `ensure_fresh` to the debounced key-set cache
/// refresh; tests substitute in-memory sources.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Candidate keys for a token: the key with the given `kid`, or all
    /// usable keys when the token declares none.
    async fn select_keys(&self, key_id: Option<&str>) -> Vec<PublicKey>;

    /// Refreshes the underlying key material.
    async fn ensure_fresh(&self) -> Result<()>;
}

/// Verifier for identity tokens issued to one relying party
#[derive(Debug, Clone)]
pub struct JwtVerifier {
    issuer: String,
    client_id: String,
}

impl JwtVerifier {
    pub fn new(issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
        }
    }

    /// Verifies signature and claims, returning the claims on success.
    ///
    /// # Errors
    ///
    /// - [`OidcError::NoMatchingKey`] when no candidate key exists even
    ///   after one refresh.
    /// - [`OidcError::InvalidSignature`] when no candidate validates the
    ///   signature.
    /// - [`OidcError::ClaimMismatch`] naming the first failing claim
    ///   (`iss`, `aud`, `exp`, or `nbf`).
    pub async fn verify(&self, jwt: &Jwt, keys: &dyn KeySource) -> Result<Claims> {
        let key_id = jwt.key_id();

        let mut candidates = keys.select_keys(key_id).await;
        if candidates.is_empty() {
            debug!(?key_id, "no candidate keys, requesting refresh");
            keys.ensure_fresh().await?;
            candidates = keys.select_keys(key_id).await;
        }
        if candidates.is_empty() {
            return Err(OidcError::NoMatchingKey.into());
        }

        self.validate_signature(jwt, &candidates)?;
        self.validate_claims(jwt.claims())?;
        Ok(jwt.claims().clone())
    }

    fn validate_signature(&self, jwt: &Jwt, candidates: &[PublicKey]) -> Result<()> {
        for key in candidates {
            let validation = signature_only_validation(key.algorithm());
            if decode::<serde_json::Value>(jwt.raw(), key.decoding_key(), &validation).is_ok() {
                return Ok(());
            }
        }
        Err(OidcError::InvalidSignature.into())
    }

    fn validate_claims(&self, claims: &Claims) -> Result<()> {
        if claims.iss != self.issuer {
            return Err(OidcError::ClaimMismatch("iss".to_string()).into());
        }
        if !claims.aud.iter().any(|a| a == &self.client_id) {
            return Err(OidcError::ClaimMismatch("aud".to_string()).into());
        }

        let now = Utc::now().timestamp();
        match claims.exp {
            Some(exp) if exp > now => {}
            _ => return Err(OidcError::ClaimMismatch("exp".to_string()).into()),
        }
        if let Some(nbf) = claims.nbf {
            if nbf > now {
                return Err(OidcError::ClaimMismatch("nbf".to_string()).into());
            }
        }
        Ok(())
    }
}

/// Validation settings that check only the signature; claim checks run
/// separately so failures name the offending claim
fn signature_only_validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use jsonwebtoken::{encode, EncodingKey, Header};

    use crate::keys::KeySet;

    const ISSUER: &str = "https://issuer.example.com";
    const CLIENT_ID: &str = "client-1";
    const SECRET: &[u8] = b"test-secret";

    fn key_set(kids: &[&str], secret: &[u8]) -> KeySet {
        let keys = kids
            .iter()
            .map(|kid| {
                let jwk = serde_json::from_value(serde_json::json!({
                    "kty": "oct",
                    "kid": kid,
                    "alg": "HS256",
                    "k": URL_SAFE_NO_PAD.encode(secret),
                }))
                .unwrap();
                PublicKey::from_jwk(&jwk).unwrap()
            })
            .collect();
        KeySet::new(keys, Utc::now() + chrono::Duration::hours(1))
    }

    fn sign_token(claims: serde_json::Value, kid: Option<&str>, secret: &[u8]) -> Jwt {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        let raw = encode(&header, &claims, &EncodingKey::from_secret(secret)).unwrap();
        Jwt::parse(raw).unwrap()
    }

    fn valid_claims() -> serde_json::Value {
        serde_json::json!({
            "iss": ISSUER,
            "sub": "user-1",
            "aud": CLIENT_ID,
            "exp": Utc::now().timestamp() + 300,
        })
    }

    /// Key source over a fixed set, swapping in a second set after the
    /// first refresh and counting refresh calls.
    struct StaticSource {
        initial: KeySet,
        refreshed: KeySet,
        refreshes: AtomicUsize,
    }

    impl StaticSource {
        fn new(initial: KeySet) -> Self {
            Self {
                refreshed: initial.clone(),
                initial,
                refreshes: AtomicUsize::new(0),
            }
        }

        fn with_refreshed(initial: KeySet, refreshed: KeySet) -> Self {
            Self {
                initial,
                refreshed,
                refreshes: AtomicUsize::new(0),
            }
        }

        fn refresh_count(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }

        fn current(&self) -> &KeySet {
            if self.refresh_count() > 0 {
                &self.refreshed
            } else {
                &self.initial
            }
        }
    }

    #[async_trait]
    impl KeySource for StaticSource {
        async fn select_keys(&self, key_id: Option<&str>) -> Vec<PublicKey> {
            match key_id {
                Some(kid) => self.current().key_by_id(kid).cloned().into_iter().collect(),
                None => self.current().active_keys().to_vec(),
            }
        }

        async fn ensure_fresh(&self) -> Result<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(ISSUER, CLIENT_ID)
    }

    fn claim_mismatch(err: anyhow::Error) -> String {
        match err.downcast_ref::<OidcError>() {
            Some(OidcError::ClaimMismatch(claim)) => claim.clone(),
            other => panic!("expected claim mismatch, got {:?}", other),
        }
    }

    // -----------------------------------------------------------------------
    // Happy path
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_valid_token_verifies() {
        let source = StaticSource::new(key_set(&["k1"], SECRET));
        let jwt = sign_token(valid_claims(), Some("k1"), SECRET);

        let claims = verifier().verify(&jwt, &source).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(source.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_token_without_kid_tries_all_keys() {
        let source = StaticSource::new(key_set(&["a", "b"], SECRET));
        let jwt = sign_token(valid_claims(), None, SECRET);
        assert!(verifier().verify(&jwt, &source).await.is_ok());
    }

    // -----------------------------------------------------------------------
    // Key selection and refresh
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_unknown_kid_triggers_single_refresh() {
        let source = StaticSource::with_refreshed(
            key_set(&["old"], SECRET),
            key_set(&["rotated"], SECRET),
        );
        let jwt = sign_token(valid_claims(), Some("rotated"), SECRET);

        let claims = verifier().verify(&jwt, &source).await.unwrap();
        assert_eq!(claims.aud, vec![CLIENT_ID.to_string()]);
        assert_eq!(source.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_still_unknown_kid_fails_without_second_refresh() {
        let source = StaticSource::new(key_set(&["k1"], SECRET));
        let jwt = sign_token(valid_claims(), Some("nonexistent"), SECRET);

        let err = verifier().verify(&jwt, &source).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OidcError>(),
            Some(OidcError::NoMatchingKey)
        ));
        assert_eq!(source.refresh_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Signatures
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_bad_signature_rejected_without_refresh() {
        let source = StaticSource::new(key_set(&["k1"], SECRET));
        let jwt = sign_token(valid_claims(), Some("k1"), b"wrong-secret");

        let err = verifier().verify(&jwt, &source).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OidcError>(),
            Some(OidcError::InvalidSignature)
        ));
        assert_eq!(source.refresh_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Claims
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let source = StaticSource::new(key_set(&["k1"], SECRET));
        let mut claims = valid_claims();
        claims["iss"] = serde_json::json!("https://issuer.example.con");
        let jwt = sign_token(claims, Some("k1"), SECRET);

        let err = verifier().verify(&jwt, &source).await.unwrap_err();
        assert_eq!(claim_mismatch(err), "iss");
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let source = StaticSource::new(key_set(&["k1"], SECRET));
        let mut claims = valid_claims();
        claims["aud"] = serde_json::json!(["someone-else"]);
        let jwt = sign_token(claims, Some("k1"), SECRET);

        let err = verifier().verify(&jwt, &source).await.unwrap_err();
        assert_eq!(claim_mismatch(err), "aud");
    }

    #[tokio::test]
    async fn test_audience_list_containing_client_id_accepted() {
        let source = StaticSource::new(key_set(&["k1"], SECRET));
        let mut claims = valid_claims();
        claims["aud"] = serde_json::json!(["someone-else", CLIENT_ID]);
        let jwt = sign_token(claims, Some("k1"), SECRET);
        assert!(verifier().verify(&jwt, &source).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let source = StaticSource::new(key_set(&["k1"], SECRET));
        let mut claims = valid_claims();
        claims["exp"] = serde_json::json!(Utc::now().timestamp() - 10);
        let jwt = sign_token(claims, Some("k1"), SECRET);

        let err = verifier().verify(&jwt, &source).await.unwrap_err();
        assert_eq!(claim_mismatch(err), "exp");
    }

    #[tokio::test]
    async fn test_missing_exp_rejected() {
        let source = StaticSource::new(key_set(&["k1"], SECRET));
        let claims = serde_json::json!({"iss": ISSUER, "aud": CLIENT_ID});
        let jwt = sign_token(claims, Some("k1"), SECRET);

        let err = verifier().verify(&jwt, &source).await.unwrap_err();
        assert_eq!(claim_mismatch(err), "exp");
    }

    #[tokio::test]
    async fn test_future_nbf_rejected() {
        let source = StaticSource::new(key_set(&["k1"], SECRET));
        let mut claims = valid_claims();
        claims["nbf"] = serde_json::json!(Utc::now().timestamp() + 300);
        let jwt = sign_token(claims, Some("k1"), SECRET);

        let err = verifier().verify(&jwt, &source).await.unwrap_err();
        assert_eq!(claim_mismatch(err), "nbf");
    }

    #[tokio::test]
    async fn test_past_nbf_accepted() {
        let source = StaticSource::new(key_set(&["k1"], SECRET));
        let mut claims = valid_claims();
        claims["nbf"] = serde_json::json!(Utc::now().timestamp() - 300);
        let jwt = sign_token(claims, Some("k1"), SECRET);
        assert!(verifier().verify(&jwt, &source).await.is_ok());
    }
}
