//! [`ApiClient`] over HTTPS with `reqwest`.
//!
//! Routes are expanded with [`Route::expand`]; leftover parameters go to
//! the query string for `GET`/`DELETE`/`HEAD` and to a JSON body for
//! everything else. Every request carries the JSON media type, the API
//! version header and, when configured, a bearer token.

use super::{param_text, status_error, ApiClient, ApiResponse, Params, Route};
use crate::error::{invalid_config, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Value sent in the `X-GitHub-Api-Version` header.
pub const DEFAULT_API_VERSION: &str = "2022-11-28";

const MEDIA_TYPE: &str = "application/vnd.github+json";

/// REST client for the remote API.
///
/// Cheap to clone; the underlying `reqwest::Client` is reference counted.
///
/// # Example
///
/// ```
/// use octochain::client::RestClient;
/// use std::time::Duration;
///
/// let client = RestClient::builder("https://api.github.com")
///     .token("ghs_example")
///     .timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
    api_version: String,
}

impl RestClient {
    pub fn builder(base_url: impl Into<String>) -> RestClientBuilder {
        RestClientBuilder {
            client: None,
            base_url: base_url.into(),
            token: None,
            timeout: None,
            user_agent: None,
            api_version: None,
        }
    }

    /// Unauthenticated client against [`DEFAULT_BASE_URL`].
    pub fn anonymous() -> Result<Self> {
        Self::builder(DEFAULT_BASE_URL).build()
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Build the full URL for an expanded route.
    fn url_for(&self, segments: &[String]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| invalid_config(format!("base URL '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MEDIA_TYPE));
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_str(&self.api_version)
                .map_err(|_| invalid_config("API version is not a valid header value"))?,
        );
        if let Some(ref token) = self.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| invalid_config("token is not a valid header value"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Parse a Retry-After header value as seconds.
    fn parse_retry_after(value: &str) -> Option<Duration> {
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    }

    /// Prefer the API's `message` field over the raw body.
    fn error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.to_string())
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url.as_str())
            .field("has_token", &self.token.is_some())
            .field("api_version", &self.api_version)
            .finish()
    }
}

fn sends_query(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::DELETE | Method::HEAD)
}

#[async_trait]
impl ApiClient for RestClient {
    async fn request(&self, route: &str, params: &Params) -> Result<ApiResponse> {
        let expanded = Route::parse(route)?.expand(params)?;
        let url = self.url_for(&expanded.segments)?;
        let path = expanded.path();

        let mut builder = self
            .http
            .request(expanded.method.clone(), url)
            .headers(self.headers()?);
        if sends_query(&expanded.method) {
            let query: Vec<(String, String)> = expanded
                .rest
                .iter()
                .map(|(k, v)| (k.clone(), param_text(v)))
                .collect();
            if !query.is_empty() {
                builder = builder.query(&query);
            }
        } else if !expanded.rest.is_empty() {
            builder = builder.json(&expanded.rest);
        }

        debug!(method = %expanded.method, path = %path, "sending request");
        let resp = builder.send().await?;
        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(
                status,
                Self::error_message(&body),
                retry_after,
                &path,
            ));
        }

        let body = resp.text().await?;
        let data = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)?
        };
        Ok(ApiResponse { status, data })
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}

/// Builder for [`RestClient`].
pub struct RestClientBuilder {
    client: Option<Client>,
    base_url: String,
    token: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    api_version: Option<String>,
}

impl RestClientBuilder {
    /// Use an existing HTTP client. `timeout` and `user_agent` are then
    /// ignored; the custom client's own settings apply.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Installation or user access token, sent as `Authorization: Bearer`.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Request timeout. Default: 30 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Default: `octochain/<crate version>`.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Default: [`DEFAULT_API_VERSION`].
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn build(self) -> Result<RestClient> {
        let base_url = Url::parse(self.base_url.trim_end_matches('/'))
            .map_err(|e| invalid_config(format!("invalid base URL '{}': {}", self.base_url, e)))?;
        let http = match self.client {
            Some(client) => client,
            None => Client::builder()
                .timeout(self.timeout.unwrap_or(Duration::from_secs(30)))
                .user_agent(
                    self.user_agent
                        .unwrap_or_else(|| format!("octochain/{}", env!("CARGO_PKG_VERSION"))),
                )
                .build()?,
        };
        Ok(RestClient {
            http,
            base_url,
            token: self.token,
            api_version: self
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        })
    }
}
