//! Verification keys, key sets, and the debounced key-set cache
//!
//! A [`KeySet`] is an immutable snapshot of the provider's published
//! signing keys together with an expiry timestamp; once the timestamp
//! passes, the set behaves as if it were empty.  [`KeySetCache`] holds the
//! latest snapshot and implements the refresh debounce: any number of
//! concurrent callers may ask for a sync, at most one actually fetches
//! within a given window.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::discovery::parse_cache_control_max_age;
use crate::error::{OidcError, Result};

/// Minimum spacing between consecutive key-set fetches triggered by
/// verification misses.
pub const KEY_SYNC_WINDOW: Duration = Duration::from_secs(5);

/// Fallback key-set lifetime when the JWKS response carries no cache
/// headers.
pub const DEFAULT_KEY_TTL: u64 = 3600;

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// A single verification key with its key-ID and signing algorithm
#[derive(Clone)]
pub struct PublicKey {
    key_id: Option<String>,
    algorithm: Algorithm,
    key: DecodingKey,
}

impl PublicKey {
    /// Builds a verification key from a JWK entry.
    ///
    /// The algorithm comes from the JWK's `alg` field when present,
    /// otherwise it is inferred from the key type.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::KeyFetch`] if the key material is malformed
    /// or the declared algorithm is not supported.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| OidcError::KeyFetch(format!("invalid JWK: {}", e)))?;

        Ok(Self {
            key_id: jwk.common.key_id.clone(),
            algorithm: jwk_algorithm(jwk)?,
            key,
        })
    }

    /// The `kid` of this key, if the provider assigned one.
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// The signing algorithm this key verifies.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The decoding key for signature validation.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Determine the verification algorithm for a JWK
fn jwk_algorithm(jwk: &Jwk) -> Result<Algorithm> {
    if let Some(key_alg) = jwk.common.key_algorithm {
        return Algorithm::from_str(&key_alg.to_string()).map_err(|_| {
            OidcError::KeyFetch(format!("unsupported key algorithm: {}", key_alg)).into()
        });
    }

    // No explicit alg; pick the conventional default for the key type.
    let algorithm = match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => Algorithm::RS256,
        AlgorithmParameters::EllipticCurve(_) => Algorithm::ES256,
        AlgorithmParameters::OctetKey(_) => Algorithm::HS256,
        AlgorithmParameters::OctetKeyPair(_) => Algorithm::EdDSA,
    };
    Ok(algorithm)
}

// ---------------------------------------------------------------------------
// KeySet
// ---------------------------------------------------------------------------

/// An immutable snapshot of the provider's signing keys
///
/// Every read path checks the expiry first: an expired set exposes zero
/// keys, which forces a refresh rather than a verification against stale
/// material.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: Vec<PublicKey>,
    expires_at: DateTime<Utc>,
}

impl KeySet {
    /// Creates a key set expiring at the given instant.
    pub fn new(keys: Vec<PublicKey>, expires_at: DateTime<Utc>) -> Self {
        Self { keys, expires_at }
    }

    /// Builds a key set from a parsed JWKS document.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::KeyFetch`] if any entry in the set cannot be
    /// converted into a verification key.
    pub fn from_jwk_set(jwk_set: &JwkSet, expires_at: DateTime<Utc>) -> Result<Self> {
        let keys = jwk_set
            .keys
            .iter()
            .map(PublicKey::from_jwk)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { keys, expires_at })
    }

    /// When this snapshot stops being usable.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the snapshot has passed its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// All usable keys; empty once the set has expired.
    pub fn active_keys(&self) -> &[PublicKey] {
        if self.is_expired() {
            &[]
        } else {
            &self.keys
        }
    }

    /// Looks up a usable key by its `kid`; `None` for unknown IDs and for
    /// expired sets.
    pub fn key_by_id(&self, key_id: &str) -> Option<&PublicKey> {
        self.active_keys()
            .iter()
            .find(|k| k.key_id() == Some(key_id))
    }
}

impl Default for KeySet {
    /// An empty, already-expired key set.
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

// ---------------------------------------------------------------------------
// KeyFetcher
// ---------------------------------------------------------------------------

/// Capability to fetch a key set from a JWKS endpoint
///
/// Abstracted behind a trait so tests can inject failures and count
/// fetches without a network.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    /// Fetches and decodes the JWKS document at `url`.
    async fn fetch_key_set(&self, url: &str) -> Result<KeySet>;
}

/// HTTP key fetcher backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpKeyFetcher {
    http: Arc<reqwest::Client>,
}

impl HttpKeyFetcher {
    pub fn new(http: Arc<reqwest::Client>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl KeyFetcher for HttpKeyFetcher {
    async fn fetch_key_set(&self, url: &str) -> Result<KeySet> {
        debug!(url, "fetching key set");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| OidcError::KeyFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OidcError::KeyFetch(format!("HTTP {}", response.status())).into());
        }

        let ttl = parse_cache_control_max_age(response.headers()).unwrap_or(DEFAULT_KEY_TTL);

        let jwk_set: JwkSet = response
            .json()
            .await
            .map_err(|e| OidcError::KeyFetch(format!("invalid JWKS document: {}", e)))?;

        let expires_at = Utc::now() + chrono::Duration::seconds(ttl as i64);
        let key_set = KeySet::from_jwk_set(&jwk_set, expires_at)?;

        debug!(
            count = key_set.active_keys().len(),
            %expires_at,
            "fetched key set"
        );
        Ok(key_set)
    }
}

// ---------------------------------------------------------------------------
// KeySetCache
// ---------------------------------------------------------------------------

struct CacheInner {
    keys: KeySet,
    last_sync: Option<Instant>,
}

/// Shared cache of the latest key-set snapshot with refresh debouncing
///
/// `maybe_sync` is the interesting path: a cheap read-locked check of the
/// sync window, then a write-locked re-check before fetching.  The write
/// guard is held across the fetch itself, so concurrent callers that lose
/// the race park on the lock and find a fresh `last_sync` when they get
/// it, skipping their own fetch.
pub struct KeySetCache {
    inner: RwLock<CacheInner>,
}

impl KeySetCache {
    /// Creates a cache seeded with an initial snapshot (typically
    /// [`KeySet::default`], which is empty and expired).
    pub fn new(initial: KeySet) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                keys: initial,
                last_sync: None,
            }),
        }
    }

    /// All currently usable keys.
    pub async fn keys(&self) -> Vec<PublicKey> {
        self.inner.read().await.keys.active_keys().to_vec()
    }

    /// A usable key by `kid`, if the cache holds one.
    pub async fn key_by_id(&self, key_id: &str) -> Option<PublicKey> {
        self.inner.read().await.keys.key_by_id(key_id).cloned()
    }

    /// Replaces the cached snapshot.
    ///
    /// The only write path for key material; external callers use it to
    /// seed an initial set, `maybe_sync` uses the same replacement
    /// internally after a fetch.
    pub async fn apply_fetched(&self, key_set: KeySet) {
        let mut inner = self.inner.write().await;
        inner.keys = key_set;
    }

    /// Refreshes the cached keys unless a sync happened recently.
    ///
    /// At most one caller fetches per [`KEY_SYNC_WINDOW`]; the rest return
    /// `Ok(())` without touching the network.  The last-sync marker moves
    /// forward whether the fetch succeeds or fails, so a failing endpoint
    /// is retried at most once per window.
    ///
    /// # Errors
    ///
    /// Propagates the fetch error to the caller that actually performed
    /// the fetch.  The cache keeps its previous snapshot on failure.
    pub async fn maybe_sync(&self, fetcher: &dyn KeyFetcher, url: &str) -> Result<()> {
        {
            let inner = self.inner.read().await;
            if within_sync_window(inner.last_sync) {
                debug!("key sync skipped, last sync within window");
                return Ok(());
            }
        }

        let mut inner = self.inner.write().await;
        // Another caller may have synced while we waited for the lock.
        if within_sync_window(inner.last_sync) {
            debug!("key sync skipped, raced with concurrent sync");
            return Ok(());
        }

        let result = fetcher.fetch_key_set(url).await;
        inner.last_sync = Some(Instant::now());

        match result {
            Ok(key_set) => {
                info!(
                    count = key_set.active_keys().len(),
                    "key set cache refreshed"
                );
                inner.keys = key_set;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn within_sync_window(last_sync: Option<Instant>) -> bool {
    match last_sync {
        Some(at) => at.elapsed() < KEY_SYNC_WINDOW,
        None => false,
    }
}
