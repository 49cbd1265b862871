//! OAuth2 token-endpoint sub-client
//!
//! [`OAuthClient`] performs the raw grant exchanges against the
//! provider's token endpoint with either `client_secret_basic` or
//! `client_secret_post` authentication.  It knows nothing about identity
//! tokens; the facade in [`crate::client`] parses and verifies the
//! `id_token` from the returned [`TokenResponse`].

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::{OidcError, Result};

pub const AUTH_METHOD_CLIENT_SECRET_BASIC: &str = "client_secret_basic";
pub const AUTH_METHOD_CLIENT_SECRET_POST: &str = "client_secret_post";

pub const GRANT_TYPE_AUTH_CODE: &str = "authorization_code";
pub const GRANT_TYPE_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_TYPE_CLIENT_CREDS: &str = "client_credentials";

// ---------------------------------------------------------------------------
// ClientCredentials
// ---------------------------------------------------------------------------

/// Relying-party credentials issued by the provider
#[derive(Clone)]
pub struct ClientCredentials {
    pub id: String,
    pub secret: String,
}

impl ClientCredentials {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("id", &self.id)
            .field("secret", &"***")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TokenResponse
// ---------------------------------------------------------------------------

/// Raw token-endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

// ---------------------------------------------------------------------------
// OAuthClient
// ---------------------------------------------------------------------------

/// Token-endpoint client bound to one auth method and scope list
#[derive(Debug)]
pub struct OAuthClient {
    http: Arc<reqwest::Client>,
    token_endpoint: String,
    credentials: ClientCredentials,
    auth_method: String,
    scopes: Vec<String>,
}

impl OAuthClient {
    /// Creates a token-endpoint client.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::UnsupportedAuthMethod`] for any auth method
    /// other than `client_secret_basic` or `client_secret_post`.
    pub fn new(
        http: Arc<reqwest::Client>,
        token_endpoint: impl Into<String>,
        credentials: ClientCredentials,
        auth_method: impl Into<String>,
        scopes: Vec<String>,
    ) -> Result<Self> {
        let auth_method = auth_method.into();
        if auth_method != AUTH_METHOD_CLIENT_SECRET_BASIC
            && auth_method != AUTH_METHOD_CLIENT_SECRET_POST
        {
            return Err(OidcError::UnsupportedAuthMethod.into());
        }

        Ok(Self {
            http,
            token_endpoint: token_endpoint.into(),
            credentials,
            auth_method,
            scopes,
        })
    }

    /// Exchanges an authorization code for tokens.
    pub async fn exchange_auth_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        self.request_token(vec![
            ("grant_type", GRANT_TYPE_AUTH_CODE.to_string()),
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
            ("scope", self.scopes.join(" ")),
        ])
        .await
    }

    /// Redeems a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.request_token(vec![
            ("grant_type", GRANT_TYPE_REFRESH_TOKEN.to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("scope", self.scopes.join(" ")),
        ])
        .await
    }

    /// Requests a token with the client-credentials grant.
    pub async fn client_credentials(&self) -> Result<TokenResponse> {
        self.request_token(vec![
            ("grant_type", GRANT_TYPE_CLIENT_CREDS.to_string()),
            ("scope", self.scopes.join(" ")),
        ])
        .await
    }

    async fn request_token(&self, mut form: Vec<(&str, String)>) -> Result<TokenResponse> {
        debug!(
            endpoint = %self.token_endpoint,
            auth_method = %self.auth_method,
            grant_type = %form.first().map(|(_, v)| v.as_str()).unwrap_or(""),
            "requesting token"
        );

        if self.auth_method == AUTH_METHOD_CLIENT_SECRET_POST {
            form.push(("client_id", self.credentials.id.clone()));
            form.push(("client_secret", self.credentials.secret.clone()));
        }

        let mut request = self.http.post(&self.token_endpoint).form(&form);
        if self.auth_method == AUTH_METHOD_CLIENT_SECRET_BASIC {
            request = request.basic_auth(&self.credentials.id, Some(&self.credentials.secret));
        }

        let response = request
            .send()
            .await
            .map_err(|e| OidcError::TokenExchange(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OidcError::TokenExchange(format!("HTTP {}: {}", status, body)).into());
        }

        response
            .json()
            .await
            .map_err(|e| OidcError::TokenExchange(format!("invalid token response: {}", e)).into())
    }
}
