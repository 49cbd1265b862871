//! Provider discovery metadata and its thread-safe store
//!
//! [`ProviderConfig`] models the subset of the OIDC discovery document
//! the client needs: endpoint URLs, advertised auth methods and grant
//! types, and a freshness deadline derived from the HTTP cache headers at
//! fetch time.  [`ProviderConfigStore`] publishes the latest snapshot to
//! concurrent readers; [`HttpProviderConfigFetcher`] performs the actual
//! well-known document fetch.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OidcError, Result};

/// Well-known path of the OIDC discovery document, relative to the issuer.
pub const DISCOVERY_CONFIG_PATH: &str = "/.well-known/openid-configuration";

/// Grants a provider is assumed to support when its metadata lists none.
const DEFAULT_GRANT_TYPES: [&str; 2] = ["authorization_code", "implicit"];

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

/// Provider discovery metadata
///
/// Immutable once constructed; the syncer replaces the whole value on
/// each successful fetch.  `expires_at` is not part of the wire document,
/// it is derived from the response's `Cache-Control: max-age` directive
/// (`None` when the provider sent no cache headers).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Issuer identifier, e.g. `https://accounts.example.com`
    #[serde(default)]
    pub issuer: String,

    /// Authorization endpoint URL
    #[serde(default)]
    pub authorization_endpoint: String,

    /// Token endpoint URL
    #[serde(default)]
    pub token_endpoint: String,

    /// JWKS (signing keys) endpoint URL
    #[serde(default)]
    pub jwks_uri: String,

    /// Token-endpoint auth methods the provider accepts
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,

    /// Grant types the provider accepts
    #[serde(default)]
    pub grant_types_supported: Vec<String>,

    /// Freshness deadline derived from HTTP cache headers at fetch time
    #[serde(skip)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ProviderConfig {
    /// Whether this is the zero value, i.e. no discovery fetch has ever
    /// succeeded.
    pub fn is_empty(&self) -> bool {
        self.issuer.is_empty()
    }

    /// Whether the freshness deadline has passed.
    ///
    /// A config without a deadline never expires.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => at <= Utc::now(),
            None => false,
        }
    }

    /// Whether the provider accepts the given grant type.
    ///
    /// Providers that advertise no grant types get the OIDC defaults,
    /// `authorization_code` and `implicit`.
    pub fn supports_grant_type(&self, grant_type: &str) -> bool {
        if self.grant_types_supported.is_empty() {
            return DEFAULT_GRANT_TYPES.contains(&grant_type);
        }
        self.grant_types_supported.iter().any(|g| g == grant_type)
    }
}

// ---------------------------------------------------------------------------
// ProviderConfigStore
// ---------------------------------------------------------------------------

/// Thread-safe holder of the latest provider configuration
///
/// Readers get a clone of the last published snapshot; the syncer
/// replaces it wholesale.  No await happens while the lock is held, so a
/// plain `std::sync::RwLock` is enough.
#[derive(Debug, Default)]
pub struct ProviderConfigStore {
    inner: RwLock<ProviderConfig>,
}

impl ProviderConfigStore {
    /// Creates a store seeded with an initial configuration (usually the
    /// empty value).
    pub fn new(initial: ProviderConfig) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    /// The last published configuration.
    pub fn get(&self) -> ProviderConfig {
        self.inner.read().unwrap().clone()
    }

    /// Publishes a new configuration, replacing the previous one.
    pub fn set(&self, config: ProviderConfig) {
        *self.inner.write().unwrap() = config;
    }
}

// ---------------------------------------------------------------------------
// ProviderConfigFetcher
// ---------------------------------------------------------------------------

/// Capability to fetch the provider's discovery metadata
#[async_trait]
pub trait ProviderConfigFetcher: Send + Sync {
    /// Fetches and decodes the discovery document.
    async fn fetch_config(&self) -> Result<ProviderConfig>;
}

/// HTTP discovery fetcher for a single issuer
///
/// Appends the well-known configuration path to the issuer URL and
/// verifies that the returned document claims the expected issuer.
#[derive(Debug, Clone)]
pub struct HttpProviderConfigFetcher {
    http: Arc<reqwest::Client>,
    issuer: String,
}

impl HttpProviderConfigFetcher {
    pub fn new(http: Arc<reqwest::Client>, issuer_url: impl Into<String>) -> Self {
        let issuer = issuer_url.into().trim_end_matches('/').to_string();
        Self { http, issuer }
    }

    /// The full discovery document URL this fetcher requests.
    pub fn discovery_url(&self) -> String {
        format!("{}{}", self.issuer, DISCOVERY_CONFIG_PATH)
    }
}

#[async_trait]
impl ProviderConfigFetcher for HttpProviderConfigFetcher {
    async fn fetch_config(&self) -> Result<ProviderConfig> {
        let url = self.discovery_url();
        debug!(url, "fetching provider configuration");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| OidcError::ConfigFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OidcError::ConfigFetch(format!("HTTP {}", response.status())).into());
        }

        let expires_at = parse_cache_control_max_age(response.headers())
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));

        let mut config: ProviderConfig = response
            .json()
            .await
            .map_err(|e| OidcError::ConfigFetch(format!("invalid discovery document: {}", e)))?;

        if config.issuer.trim_end_matches('/') != self.issuer {
            return Err(OidcError::ConfigFetch(format!(
                "issuer mismatch: expected {}, got {}",
                self.issuer, config.issuer
            ))
            .into());
        }

        config.expires_at = expires_at;
        Ok(config)
    }
}

/// Extract the `max-age` directive (in seconds) from a `Cache-Control`
/// header, if present
pub(crate) fn parse_cache_control_max_age(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let value = headers
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?;

    for directive in value.split(',') {
        let directive = directive.trim().to_ascii_lowercase();
        if let Some(secs) = directive.strip_prefix("max-age=") {
            return secs.parse().ok();
        }
    }
    None
}
