//! OAuth2 client-credentials token lifecycle.
//!
//! The token is exchanged lazily on first use and cached. There is no
//! expiry bookkeeping: a provider rejecting the token triggers exactly one
//! refresh-and-retry through [`TokenManager::with_token`].

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ModelConfig;
use crate::error::Error;
use crate::Result;

/// Default identity host.
pub const DEFAULT_AUTH_URL: &str = "https://idm.stackspot.com";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ClientCredentialsRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

/// Caches a bearer token obtained through the client-credentials grant.
pub struct TokenManager {
    http: Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    timeout: Option<Duration>,
    cached: Mutex<Option<String>>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a manager for `{auth_url}/{realm}/oidc/oauth/token`.
    pub fn new(
        http: Client,
        auth_url: &str,
        realm: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        let raw = format!("{}/{}/oidc/oauth/token", auth_url.trim_end_matches('/'), realm);
        let token_url = Url::parse(&raw)
            .map_err(|e| Error::Config(format!("Invalid token URL {raw}: {e}")))?;

        Ok(Self {
            http,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: None,
            cached: Mutex::new(None),
        })
    }

    /// Build from a model config. Client id, secret and realm are required.
    pub fn from_config(http: Client, config: &ModelConfig) -> Result<Self> {
        let client_id = config.require(&config.client_id, "client_id")?;
        let client_secret = config.require(&config.client_secret, "client_secret")?;
        let realm = config.require(&config.realm, "realm")?;
        let auth_url = config.auth_url.as_deref().unwrap_or(DEFAULT_AUTH_URL);

        let mut manager = Self::new(http, auth_url, realm, client_id, client_secret)?;
        manager.timeout = config.timeout();
        Ok(manager)
    }

    pub fn token_url(&self) -> &str {
        self.token_url.as_str()
    }

    /// The cached token, exchanging credentials first if there is none.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            debug!("Using cached access token");
            return Ok(token.clone());
        }

        let token = self.exchange().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Discard the cached token and exchange credentials again.
    ///
    /// On failure nothing stays cached, so the next call exchanges again.
    pub async fn refresh(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        *cached = None;

        let token = self.exchange().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Run `call` with a valid token.
    ///
    /// If `call` fails with an authentication error, the token is refreshed
    /// and `call` is re-run once. Whatever that second run returns is final.
    pub async fn with_token<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = self.token().await?;
        match call(token).await {
            Err(err) if err.is_auth() => {
                warn!("Access token rejected ({}), refreshing", err);
                let token = self.refresh().await?;
                call(token).await
            }
            other => other,
        }
    }

    async fn exchange(&self) -> Result<String> {
        info!("Requesting access token from {}", self.token_url);

        let form = ClientCredentialsRequest {
            grant_type: "client_credentials",
            client_id: &self.client_id,
            client_secret: &self.client_secret,
        };

        let mut request = self.http.post(self.token_url.clone()).form(&form);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::TokenExchange(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenExchange(format!("HTTP {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::TokenExchange(format!("unreadable token response: {e}")))?;

        if token.access_token.is_empty() {
            return Err(Error::TokenExchange(
                "token response has no access_token".to_string(),
            ));
        }

        debug!(
            "Obtained {} token (expires_in: {:?})",
            token.token_type.as_deref().unwrap_or("bearer"),
            token.expires_in
        );
        Ok(token.access_token)
    }
}
