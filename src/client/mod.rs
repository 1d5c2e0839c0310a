//! Client trait and route types for the remote REST API.
//!
//! The [`ApiClient`] trait abstracts over how operations reach the remote
//! platform. Implementors provide one generic [`ApiClient::request`] that
//! takes an endpoint-and-method string such as
//! `"GET /repos/{owner}/{repo}"` plus a parameter map. The bound
//! operations (repositories, public keys, secrets, contents, refs) are
//! default methods built on top of it.
//!
//! ## Architecture
//!
//! ```text
//! Request / Task ──► ApiClient::request(route, params) ──► ApiResponse { data }
//!                              │
//!                   ┌──────────┴──────────┐
//!              RestClient            MockClient
//!           reqwest + bearer     canned replies per route
//! ```

pub mod mock;
pub mod rest;

pub use mock::{MockClient, MockReply};
pub use rest::{RestClient, RestClientBuilder};

use crate::error::{invalid_config, Result};
use crate::ChainError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Parameters for one operation: path placeholders, query values and body
/// fields in a single map.
pub type Params = Map<String, Value>;

/// Build a [`Params`] map from `(name, value)` pairs.
///
/// ```
/// use octochain::client::params;
/// use serde_json::json;
///
/// let p = params([("owner", json!("acme")), ("repo", json!("site"))]);
/// assert_eq!(p["owner"], "acme");
/// ```
pub fn params<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON payload (`Null` for empty bodies).
    pub data: Value,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self { status: 200, data }
    }
}

/// Input to [`ApiClient::put_content`].
#[derive(Debug, Clone)]
pub struct FileUpdate {
    pub owner: String,
    pub repo: String,
    pub path: String,
    /// Plain-text content; base64-encoded on the wire.
    pub content: String,
    pub branch: String,
    pub message: String,
    /// Blob SHA of the content being replaced. `None` creates the file.
    pub sha: Option<String>,
}

/// Authenticated access to the remote API.
///
/// This trait is object-safe and designed to be used as
/// `Arc<dyn ApiClient>` or `&dyn ApiClient`.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Issue `route` (e.g. `"GET /repos/{owner}/{repo}"`) with `params`.
    async fn request(&self, route: &str, params: &Params) -> Result<ApiResponse>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<ApiResponse> {
        self.request(
            "GET /repos/{owner}/{repo}",
            &params([("owner", json!(owner)), ("repo", json!(repo))]),
        )
        .await
    }

    async fn get_repo_by_id(&self, id: u64) -> Result<ApiResponse> {
        self.request(
            "GET /repositories/{repository_id}",
            &params([("repository_id", json!(id))]),
        )
        .await
    }

    /// Public key used to seal repository secrets (`key_id`, `key`).
    async fn get_public_key(&self, owner: &str, repo: &str) -> Result<ApiResponse> {
        self.request(
            "GET /repos/{owner}/{repo}/actions/secrets/public-key",
            &params([("owner", json!(owner)), ("repo", json!(repo))]),
        )
        .await
    }

    /// Create or update a repository secret from an already sealed value.
    async fn put_secret(
        &self,
        owner: &str,
        repo: &str,
        name: &str,
        encrypted_value: &str,
        key_id: &str,
    ) -> Result<ApiResponse> {
        self.request(
            "PUT /repos/{owner}/{repo}/actions/secrets/{secret_name}",
            &params([
                ("owner", json!(owner)),
                ("repo", json!(repo)),
                ("secret_name", json!(name)),
                ("encrypted_value", json!(encrypted_value)),
                ("key_id", json!(key_id)),
            ]),
        )
        .await
    }

    /// Fetch a file. The `content` field stays base64; see [`decode_content`].
    async fn get_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<ApiResponse> {
        let mut p = params([
            ("owner", json!(owner)),
            ("repo", json!(repo)),
            ("path", json!(path)),
        ]);
        if let Some(r) = git_ref {
            p.insert("ref".into(), json!(r));
        }
        self.request("GET /repos/{owner}/{repo}/contents/{path}", &p)
            .await
    }

    /// Create or update a file on a branch.
    async fn put_content(&self, update: &FileUpdate) -> Result<ApiResponse> {
        let mut p = params([
            ("owner", json!(update.owner)),
            ("repo", json!(update.repo)),
            ("path", json!(update.path)),
            ("message", json!(update.message)),
            ("content", json!(STANDARD.encode(update.content.as_bytes()))),
            ("branch", json!(update.branch)),
        ]);
        if let Some(ref sha) = update.sha {
            p.insert("sha".into(), json!(sha));
        }
        self.request("PUT /repos/{owner}/{repo}/contents/{path}", &p)
            .await
    }

    /// Look up a git ref such as `heads/main`.
    async fn get_ref(&self, owner: &str, repo: &str, git_ref: &str) -> Result<ApiResponse> {
        self.request(
            "GET /repos/{owner}/{repo}/git/ref/{ref}",
            &params([
                ("owner", json!(owner)),
                ("repo", json!(repo)),
                ("ref", json!(git_ref)),
            ]),
        )
        .await
    }

    /// Create a ref (`refs/heads/<branch>`) pointing at `sha`.
    async fn create_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        sha: &str,
    ) -> Result<ApiResponse> {
        self.request(
            "POST /repos/{owner}/{repo}/git/refs",
            &params([
                ("owner", json!(owner)),
                ("repo", json!(repo)),
                ("ref", json!(git_ref)),
                ("sha", json!(sha)),
            ]),
        )
        .await
    }
}

/// Decode the base64 `content` field of a contents response.
///
/// The API wraps base64 at 60 columns, so embedded newlines are dropped
/// before decoding.
pub fn decode_content(data: &Value) -> Result<String> {
    let encoded = data
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| ChainError::MissingField {
            field: "content".into(),
        })?;
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| ChainError::Other(format!("content is not valid base64: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| ChainError::Other(format!("content is not valid UTF-8: {}", e)))
}

/// A parsed `"METHOD /path/{placeholder}"` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    segments: Vec<String>,
}

/// A route with its placeholders filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedRoute {
    pub method: Method,
    /// Literal path segments, unescaped.
    pub segments: Vec<String>,
    /// Parameters not consumed by placeholders.
    pub rest: Params,
}

impl ExpandedRoute {
    /// The path joined with `/`, for logging and error messages.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

impl Route {
    /// Parse a route string. The method is upper-cased; the path must
    /// start with `/`.
    pub fn parse(route: &str) -> Result<Self> {
        let (method, path) = route
            .trim()
            .split_once(' ')
            .ok_or_else(|| invalid_config(format!("route '{}' must be 'METHOD /path'", route)))?;
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| invalid_config(format!("route '{}' has an invalid method", route)))?;
        let path = path.trim();
        if !path.starts_with('/') {
            return Err(invalid_config(format!(
                "route '{}' path must start with '/'",
                route
            )));
        }
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self { method, segments })
    }

    /// Fill `{name}` segments from `params`.
    ///
    /// A value containing `/` expands to several segments, so file paths
    /// and refs like `heads/main` keep their slashes.
    pub fn expand(&self, params: &Params) -> Result<ExpandedRoute> {
        let mut rest = params.clone();
        let mut segments = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match placeholder(segment) {
                Some(name) => {
                    let value = rest.remove(name).ok_or_else(|| {
                        invalid_config(format!("missing path parameter '{}'", name))
                    })?;
                    let text = param_text(&value);
                    segments.extend(
                        text.split('/')
                            .filter(|s| !s.is_empty())
                            .map(str::to_string),
                    );
                }
                None => segments.push(segment.clone()),
            }
        }
        Ok(ExpandedRoute {
            method: self.method.clone(),
            segments,
            rest,
        })
    }
}

fn placeholder(segment: &str) -> Option<&str> {
    segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .filter(|s| !s.is_empty())
}

/// Render a parameter for a path segment or query string.
pub(crate) fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map a non-success status to a [`ChainError`]. 404 becomes
/// [`ChainError::NotFound`].
pub(crate) fn status_error(
    status: u16,
    message: String,
    retry_after: Option<Duration>,
    resource: &str,
) -> ChainError {
    if status == 404 {
        ChainError::NotFound {
            resource: resource.to_string(),
        }
    } else {
        ChainError::Http {
            status,
            message,
            retry_after,
        }
    }
}
