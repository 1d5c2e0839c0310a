//! OAuth authorization-code and refresh-token exchange.
//!
//! Exchanges are single attempts. A failed exchange usually means a used,
//! expired or revoked code, and repeating it cannot succeed.

use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::status_error;
use crate::error::{ChainError, Result};

/// Default token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

/// Access token plus optional refresh token returned by an exchange.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until `access_token` expires.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token_expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// An OAuth application's client credentials.
///
/// # Example
///
/// ```no_run
/// use octochain::auth::OAuthApp;
///
/// # async fn demo() -> octochain::Result<()> {
/// let app = OAuthApp::new("Iv1.abc", "secret");
/// let tokens = app.exchange_code("code-from-callback").await?;
/// if let Some(refresh) = tokens.refresh_token.as_deref() {
///     let renewed = app.refresh(refresh).await?;
///     println!("expires in {:?}s", renewed.expires_in);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OAuthApp {
    client_id: String,
    client_secret: String,
    token_url: String,
    http: Client,
}

impl OAuthApp {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            http: Client::new(),
        }
    }

    /// Override the token endpoint (e.g. for an enterprise host).
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Use an existing HTTP client.
    pub fn with_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Exchange an authorization code.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenPair> {
        self.exchange(json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "code": code,
        }))
        .await
    }

    /// Exchange a refresh token for a new pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        self.exchange(json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        }))
        .await
    }

    async fn exchange(&self, body: Value) -> Result<TokenPair> {
        debug!(url = %self.token_url, "exchanging OAuth credentials");
        let resp = self
            .http
            .post(&self.token_url)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            let err = status_error(status.as_u16(), text, None, &self.token_url);
            warn!(error = %err, "OAuth exchange rejected");
            return Err(err);
        }

        let reply: Value = serde_json::from_str(&text)?;
        parse_token_reply(reply).inspect_err(|e| warn!(error = %e, "OAuth exchange failed"))
    }
}

impl std::fmt::Debug for OAuthApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthApp")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_url", &self.token_url)
            .finish()
    }
}

/// Interpret a token endpoint reply. The endpoint answers 200 even for
/// rejected codes and reports the problem in an `error` field.
pub fn parse_token_reply(reply: Value) -> Result<TokenPair> {
    if let Some(code) = reply.get("error").and_then(Value::as_str) {
        let description = reply
            .get("error_description")
            .and_then(Value::as_str)
            .unwrap_or(code);
        return Err(ChainError::Credential(description.to_string()));
    }
    serde_json::from_value(reply)
        .map_err(|e| ChainError::Credential(format!("malformed token response: {}", e)))
}
