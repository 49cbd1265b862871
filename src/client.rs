//! The relying-party client facade
//!
//! [`Client`] composes the provider-config store, the key-set cache, the
//! token-endpoint sub-client, and the verifier into the public API: start
//! background discovery sync, perform the token grants, and verify the
//! resulting identity tokens.  All token-returning methods run the
//! `id_token` through full verification and short-circuit on the first
//! error.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::discovery::{
    HttpProviderConfigFetcher, ProviderConfig, ProviderConfigStore,
};
use crate::error::{OidcError, Result};
use crate::jwt::{Claims, Jwt};
use crate::keys::{HttpKeyFetcher, KeySet, KeySetCache, PublicKey};
use crate::oauth::{
    ClientCredentials, OAuthClient, TokenResponse, AUTH_METHOD_CLIENT_SECRET_BASIC,
    AUTH_METHOD_CLIENT_SECRET_POST, GRANT_TYPE_CLIENT_CREDS,
};
use crate::syncer::{ProviderConfigSyncer, SyncHandle};
use crate::verify::{JwtVerifier, KeySource};

use async_trait::async_trait;

/// Scopes requested when the caller configures none.
pub const DEFAULT_SCOPE: [&str; 3] = ["openid", "email", "profile"];

/// Request timeout on the default HTTP client.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// ClientMetadata
// ---------------------------------------------------------------------------

/// Registered relying-party metadata
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata {
    pub redirect_urls: Vec<Url>,
}

impl ClientMetadata {
    /// Checks that the redirect URLs are usable: at least one, http(s)
    /// only, and each with a host.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::InvalidClientMetadata`] naming the first
    /// problem found.
    pub fn validate(&self) -> Result<()> {
        if self.redirect_urls.is_empty() {
            return Err(OidcError::InvalidClientMetadata("no redirect URLs".to_string()).into());
        }
        for url in &self.redirect_urls {
            match url.scheme() {
                "http" | "https" => {}
                scheme => {
                    return Err(OidcError::InvalidClientMetadata(format!(
                        "invalid redirect URL scheme: {}",
                        scheme
                    ))
                    .into());
                }
            }
            if url.host_str().map(str::is_empty).unwrap_or(true) {
                return Err(OidcError::InvalidClientMetadata(format!(
                    "redirect URL missing host: {}",
                    url
                ))
                .into());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Configuration for building a [`Client`]
#[derive(Debug, Default)]
pub struct ClientConfig {
    /// HTTP client override; a 30-second-timeout client is built when
    /// absent
    pub http_client: Option<Arc<reqwest::Client>>,

    /// Relying-party credentials
    pub credentials: Option<ClientCredentials>,

    /// Requested scopes; [`DEFAULT_SCOPE`] when empty
    pub scope: Vec<String>,

    /// Redirect URL for the authorization-code flow
    pub redirect_url: Option<Url>,

    /// Initial provider configuration, for callers that skip discovery
    pub provider_config: ProviderConfig,

    /// Initial key set, for callers with out-of-band key material
    pub key_set: KeySet,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// OIDC relying-party client
pub struct Client {
    http: Arc<reqwest::Client>,
    credentials: ClientCredentials,
    scope: Vec<String>,
    redirect_url: Option<Url>,
    config_store: Arc<ProviderConfigStore>,
    key_cache: Arc<KeySetCache>,
}

impl Client {
    /// Builds a client from the given configuration.
    ///
    /// # Errors
    ///
    /// Fails when credentials are missing, the redirect URL does not
    /// validate, or the default HTTP client cannot be constructed.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let credentials = config
            .credentials
            .ok_or_else(|| OidcError::InvalidClientMetadata("no credentials".to_string()))?;

        if let Some(redirect_url) = &config.redirect_url {
            ClientMetadata {
                redirect_urls: vec![redirect_url.clone()],
            }
            .validate()?;
        }

        let http = match config.http_client {
            Some(http) => http,
            None => Arc::new(
                reqwest::Client::builder()
                    .timeout(DEFAULT_HTTP_TIMEOUT)
                    .build()
                    .map_err(OidcError::Http)?,
            ),
        };

        let scope = if config.scope.is_empty() {
            DEFAULT_SCOPE.iter().map(|s| s.to_string()).collect()
        } else {
            config.scope
        };

        Ok(Self {
            http,
            credentials,
            scope,
            redirect_url: config.redirect_url,
            config_store: Arc::new(ProviderConfigStore::new(config.provider_config)),
            key_cache: Arc::new(KeySetCache::new(config.key_set)),
        })
    }

    /// The last synced provider configuration.
    pub fn provider_config(&self) -> ProviderConfig {
        self.config_store.get()
    }

    /// Starts background discovery sync against the given issuer.
    ///
    /// Blocks until the first fetch succeeds (or fails, in which case the
    /// error is returned and nothing is spawned).  The returned handle
    /// stops the periodic loop.
    pub async fn sync_provider_config(&self, issuer_url: &str) -> Result<SyncHandle> {
        let fetcher = HttpProviderConfigFetcher::new(Arc::clone(&self.http), issuer_url);
        ProviderConfigSyncer::new(Arc::new(fetcher), Arc::clone(&self.config_store))
            .run()
            .await
    }

    /// Whether the client holds a usable provider configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Unhealthy`] when no configuration was ever
    /// synced or the last one has passed its freshness deadline.
    pub fn healthy(&self) -> Result<()> {
        let config = self.config_store.get();
        if config.is_empty() {
            return Err(OidcError::Unhealthy("empty".to_string()).into());
        }
        if config.is_expired() {
            return Err(OidcError::Unhealthy("expired".to_string()).into());
        }
        Ok(())
    }

    /// The authorization-endpoint URL to send the user to.
    ///
    /// # Errors
    ///
    /// Fails when no redirect URL is configured or the provider's
    /// authorization endpoint is missing or unparsable.
    pub fn auth_code_url(&self, state: &str) -> Result<Url> {
        let redirect_url = self.redirect_url.as_ref().ok_or_else(|| {
            OidcError::InvalidClientMetadata("no redirect URL configured".to_string())
        })?;

        let config = self.config_store.get();
        let mut url = Url::parse(&config.authorization_endpoint).map_err(|e| {
            OidcError::ConfigFetch(format!("invalid authorization endpoint: {}", e))
        })?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.credentials.id)
            .append_pair("redirect_uri", redirect_url.as_str())
            .append_pair("scope", &self.scope.join(" "))
            .append_pair("state", state);
        Ok(url)
    }

    /// Exchanges an authorization code and verifies the returned
    /// identity token.
    pub async fn exchange_auth_code(&self, code: &str) -> Result<VerifiedToken> {
        let redirect_url = self.redirect_url.as_ref().ok_or_else(|| {
            OidcError::InvalidClientMetadata("no redirect URL configured".to_string())
        })?;

        let response = self
            .oauth_client()?
            .exchange_auth_code(code, redirect_url.as_str())
            .await?;
        self.verified(response).await
    }

    /// Redeems a refresh token and verifies the returned identity token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<VerifiedToken> {
        let response = self.oauth_client()?.refresh(refresh_token).await?;
        self.verified(response).await
    }

    /// Requests a token with the client-credentials grant and verifies
    /// the returned identity token.
    ///
    /// An empty `scope` falls back to the client's configured scopes.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::GrantTypeUnsupported`] before any network
    /// call when the provider does not advertise the grant.
    pub async fn client_creds_token(&self, scope: &[String]) -> Result<VerifiedToken> {
        let config = self.config_store.get();
        if !config.supports_grant_type(GRANT_TYPE_CLIENT_CREDS) {
            return Err(
                OidcError::GrantTypeUnsupported(GRANT_TYPE_CLIENT_CREDS.to_string()).into(),
            );
        }

        let scope = if scope.is_empty() {
            self.scope.clone()
        } else {
            scope.to_vec()
        };
        let response = self.oauth_client_with_scope(scope)?.client_credentials().await?;
        self.verified(response).await
    }

    /// Verifies an identity token against the cached provider keys,
    /// refreshing them on a miss.
    pub async fn verify_jwt(&self, jwt: &Jwt) -> Result<Claims> {
        let config = self.config_store.get();
        let verifier = JwtVerifier::new(config.issuer, self.credentials.id.clone());
        let source = ClientKeySource {
            cache: Arc::clone(&self.key_cache),
            fetcher: HttpKeyFetcher::new(Arc::clone(&self.http)),
            store: Arc::clone(&self.config_store),
        };
        verifier.verify(jwt, &source).await
    }

    /// Builds the token-endpoint sub-client for the current provider
    /// configuration.
    fn oauth_client(&self) -> Result<OAuthClient> {
        self.oauth_client_with_scope(self.scope.clone())
    }

    fn oauth_client_with_scope(&self, scope: Vec<String>) -> Result<OAuthClient> {
        let config = self.config_store.get();
        let auth_method = choose_auth_method(&config)?;
        debug!(auth_method, "building token endpoint client");

        OAuthClient::new(
            Arc::clone(&self.http),
            config.token_endpoint,
            self.credentials.clone(),
            auth_method,
            scope,
        )
    }

    async fn verified(&self, response: TokenResponse) -> Result<VerifiedToken> {
        let raw = response
            .id_token
            .clone()
            .ok_or_else(|| OidcError::TokenExchange("missing id_token".to_string()))?;
        let id_token = Jwt::parse(raw)?;
        let claims = self.verify_jwt(&id_token).await?;
        Ok(VerifiedToken {
            response,
            id_token,
            claims,
        })
    }
}

/// A token-endpoint response whose identity token passed verification
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// The raw token-endpoint response
    pub response: TokenResponse,
    /// The parsed identity token
    pub id_token: Jwt,
    /// The verified claims
    pub claims: Claims,
}

/// Pick the token-endpoint auth method from provider metadata
///
/// Providers advertising nothing get `client_secret_basic`; otherwise the
/// first advertised method this client implements wins.
fn choose_auth_method(config: &ProviderConfig) -> Result<&'static str> {
    if config.token_endpoint_auth_methods_supported.is_empty() {
        return Ok(AUTH_METHOD_CLIENT_SECRET_BASIC);
    }
    for method in &config.token_endpoint_auth_methods_supported {
        match method.as_str() {
            AUTH_METHOD_CLIENT_SECRET_BASIC => return Ok(AUTH_METHOD_CLIENT_SECRET_BASIC),
            AUTH_METHOD_CLIENT_SECRET_POST => return Ok(AUTH_METHOD_CLIENT_SECRET_POST),
            _ => {}
        }
    }
    Err(OidcError::UnsupportedAuthMethod.into())
}

/// Key source backed by the shared cache, refreshing from the provider's
/// JWKS endpoint on demand
struct ClientKeySource {
    cache: Arc<KeySetCache>,
    fetcher: HttpKeyFetcher,
    store: Arc<ProviderConfigStore>,
}

#[async_trait]
impl KeySource for ClientKeySource {
    async fn select_keys(&self, key_id: Option<&str>) -> Vec<PublicKey> {
        match key_id {
            Some(kid) => self.cache.key_by_id(kid).await.into_iter().collect(),
            None => self.cache.keys().await,
        }
    }

    async fn ensure_fresh(&self) -> Result<()> {
        let config = self.store.get();
        if config.jwks_uri.is_empty() {
            return Err(OidcError::KeyFetch(
                "no keys endpoint in provider configuration".to_string(),
            )
            .into());
        }
        self.cache.maybe_sync(&self.fetcher, &config.jwks_uri).await
    }
}
