//! # oidc-rp
//!
//! An OpenID Connect relying-party client library.
//!
//! `oidc-rp` performs the OAuth2/OIDC token grants (authorization code,
//! refresh token, client credentials), verifies the resulting identity
//! tokens against the provider's published signing keys, and keeps both
//! the provider's discovery metadata and its key set fresh in the
//! background.
//!
//! ## Features
//!
//! - **Discovery sync**: a background task re-fetches the provider's
//!   well-known configuration ahead of its cache expiry, keeping the last
//!   good snapshot through transient failures.
//! - **Debounced key refresh**: verification misses trigger at most one
//!   JWKS fetch per window, no matter how many tasks verify concurrently.
//! - **Strict verification**: key sets past their expiry are treated as
//!   empty, signatures are checked per-key with the key's own algorithm,
//!   and claim failures name the offending claim.
//!
//! ## Example
//!
//! ```no_run
//! use oidc_rp::{Client, ClientConfig, ClientCredentials};
//!
//! #[tokio::main]
//! async fn main() -> oidc_rp::Result<()> {
//!     let client = Client::new(ClientConfig {
//!         credentials: Some(ClientCredentials::new("my-client", "my-secret")),
//!         redirect_url: Some("https://app.example.com/callback".parse()?),
//!         ..Default::default()
//!     })?;
//!
//!     // Blocks until the first discovery fetch succeeds.
//!     let sync = client
//!         .sync_provider_config("https://accounts.example.com")
//!         .await?;
//!
//!     let token = client.exchange_auth_code("the-auth-code").await?;
//!     println!("subject: {}", token.claims.sub);
//!
//!     sync.stop().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod discovery;
pub mod error;
pub mod jwt;
pub mod keys;
pub mod oauth;
pub mod syncer;
pub mod verify;

pub use client::{
    Client, ClientConfig, ClientMetadata, VerifiedToken, DEFAULT_HTTP_TIMEOUT, DEFAULT_SCOPE,
};
pub use discovery::{
    HttpProviderConfigFetcher, ProviderConfig, ProviderConfigFetcher, ProviderConfigStore,
    DISCOVERY_CONFIG_PATH,
};
pub use error::{OidcError, Result};
pub use jwt::{Claims, Jwt};
pub use keys::{
    HttpKeyFetcher, KeyFetcher, KeySet, KeySetCache, PublicKey, DEFAULT_KEY_TTL, KEY_SYNC_WINDOW,
};
pub use oauth::{ClientCredentials, OAuthClient, TokenResponse};
pub use syncer::{ProviderConfigSyncer, SyncHandle};
pub use verify::{JwtVerifier, KeySource};
