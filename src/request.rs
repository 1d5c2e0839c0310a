//! Immutable, reusable descriptions of one remote call plus its retry
//! policy.
//!
//! Every `with_*` method borrows the [`Request`] and returns a new one, so a
//! partially configured request works as a template:
//!
//! ```
//! use octochain::client::{ApiClient, MockClient};
//! use octochain::request::Request;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let repo = Request::route("GET /repos/{owner}/{repo}")
//!     .param("owner", "acme")
//!     .with_interval(Duration::ZERO);
//!
//! let site = repo.param("repo", "site").with_field("default_branch");
//! let docs = repo.param("repo", "docs").with_max_retries(5).unwrap();
//!
//! let mock = MockClient::new().reply(
//!     "GET /repos/{owner}/{repo}",
//!     json!({"default_branch": "main"}),
//! );
//! assert_eq!(site.run_with(&mock).await.unwrap(), json!("main"));
//! assert_eq!(docs.policy().max_retries(), 5);
//! assert!(repo.descriptor().params().get("repo").is_none());
//! # });
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

use crate::client::{ApiClient, ApiResponse, Params, Route};
use crate::error::{ChainError, Result};
use crate::retry::{run_with_retries, RetryPolicy, Verdict};
use crate::sleeper::Sleeper;

/// Caller-supplied operation bound to a client.
pub type BoundFn = Arc<
    dyn for<'a> Fn(&'a dyn ApiClient, &'a Params) -> BoxFuture<'a, Result<ApiResponse>>
        + Send
        + Sync,
>;

/// What a request calls: a route string or a bound operation handle.
#[derive(Clone)]
pub enum Operation {
    /// `"METHOD /path/{placeholder}"`, issued through [`ApiClient::request`].
    Route(String),
    /// A closure over the client, e.g. one of its bound operations.
    Bound { name: String, call: BoundFn },
}

impl Operation {
    pub fn route(route: impl Into<String>) -> Self {
        Operation::Route(route.into())
    }

    /// Wrap a closure over the client.
    ///
    /// ```
    /// use octochain::request::Operation;
    ///
    /// let op = Operation::bound("get_ref", |client, params| {
    ///     Box::pin(async move {
    ///         let owner = params["owner"].as_str().unwrap_or_default();
    ///         let repo = params["repo"].as_str().unwrap_or_default();
    ///         client.get_ref(owner, repo, "heads/main").await
    ///     })
    /// });
    /// assert_eq!(op.name(), "get_ref");
    /// ```
    pub fn bound<F>(name: impl Into<String>, call: F) -> Self
    where
        F: for<'a> Fn(&'a dyn ApiClient, &'a Params) -> BoxFuture<'a, Result<ApiResponse>>
            + Send
            + Sync
            + 'static,
    {
        Operation::Bound {
            name: name.into(),
            call: Arc::new(call),
        }
    }

    /// Route string or handle name, for logging.
    pub fn name(&self) -> &str {
        match self {
            Operation::Route(route) => route,
            Operation::Bound { name, .. } => name,
        }
    }

    async fn invoke(&self, client: &dyn ApiClient, params: &Params) -> Result<ApiResponse> {
        match self {
            Operation::Route(route) => client.request(route, params).await,
            Operation::Bound { call, .. } => call(client, params).await,
        }
    }
}

impl From<&str> for Operation {
    fn from(route: &str) -> Self {
        Operation::Route(route.to_string())
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Route(route) => f.debug_tuple("Route").field(route).finish(),
            Operation::Bound { name, .. } => f.debug_struct("Bound").field("name", name).finish(),
        }
    }
}

/// Operation, parameters and optional result-field projection.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    operation: Operation,
    params: Params,
    result_field: Option<String>,
}

impl RequestDescriptor {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn result_field(&self) -> Option<&str> {
        self.result_field.as_deref()
    }
}

/// A [`RequestDescriptor`] paired with a [`RetryPolicy`].
///
/// The builder imposes no minimum interval; `max_retries` is validated
/// when it is set.
#[derive(Debug, Clone)]
pub struct Request {
    descriptor: RequestDescriptor,
    policy: RetryPolicy,
}

impl Request {
    /// Request with the default [`RetryPolicy`].
    pub fn new(operation: impl Into<Operation>) -> Self {
        Self {
            descriptor: RequestDescriptor {
                operation: operation.into(),
                params: Params::new(),
                result_field: None,
            },
            policy: RetryPolicy::default(),
        }
    }

    /// Shorthand for `Request::new(Operation::route(route))`.
    pub fn route(route: impl Into<String>) -> Self {
        Self::new(Operation::route(route))
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Copy with one more parameter (replacing any previous value).
    pub fn param(&self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.descriptor.params.insert(name.into(), value.into());
        next
    }

    /// Copy with `params` merged over the existing ones.
    pub fn params(&self, params: Params) -> Self {
        let mut next = self.clone();
        next.descriptor.params.extend(params);
        next
    }

    /// Copy that returns only `field` of the response payload.
    pub fn with_field(&self, field: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.descriptor.result_field = Some(field.into());
        next
    }

    /// Copy with a new attempt limit. Fails at once if `max_retries` is
    /// zero or above [`MAX_RETRIES_LIMIT`](crate::retry::MAX_RETRIES_LIMIT).
    pub fn with_max_retries(&self, max_retries: u32) -> Result<Self> {
        Ok(Self {
            descriptor: self.descriptor.clone(),
            policy: self.policy.clone().with_max_retries(max_retries)?,
        })
    }

    pub fn with_interval(&self, interval: Duration) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            policy: self.policy.clone().with_interval(interval),
        }
    }

    pub fn with_stop_predicate(
        &self,
        f: impl Fn(ChainError) -> Verdict + Send + Sync + 'static,
    ) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            policy: self.policy.clone().with_stop_predicate(f),
        }
    }

    /// Copy with an entirely different policy.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            policy,
        }
    }

    pub fn with_sleeper(&self, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            policy: self.policy.clone().with_sleeper(sleeper),
        }
    }

    /// Execute through `client` under this request's retry policy.
    ///
    /// Retries cover the call only. A route that does not parse, or whose
    /// placeholders are not all bound, fails before the first attempt.
    /// Projection runs once on the successful response; an absent field is
    /// [`ChainError::MissingField`].
    pub async fn run_with(&self, client: &dyn ApiClient) -> Result<Value> {
        let RequestDescriptor {
            operation,
            params,
            result_field,
        } = &self.descriptor;

        if let Operation::Route(route) = operation {
            Route::parse(route)?.expand(params)?;
        }

        let response =
            run_with_retries(|| operation.invoke(client, params), &self.policy).await?;

        match result_field {
            None => Ok(response.data),
            Some(field) => project(response.data, field).inspect_err(|e| {
                warn!(operation = %operation.name(), error = %e, "response projection failed");
            }),
        }
    }
}

/// Take `field` out of an object payload.
pub(crate) fn project(mut data: Value, field: &str) -> Result<Value> {
    data.as_object_mut()
        .and_then(|obj| obj.remove(field))
        .ok_or_else(|| ChainError::MissingField {
            field: field.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockClient, RestClient};
    use crate::outcome::ErrorKind;
    use crate::sleeper::{InstantSleeper, TrackingSleeper};
    use serde_json::json;

    const REPO: &str = "GET /repos/{owner}/{repo}";

    fn base() -> Request {
        Request::route(REPO)
            .param("owner", "acme")
            .param("repo", "site")
            .with_sleeper(Arc::new(InstantSleeper))
    }

    #[test]
    fn test_with_methods_leave_original_untouched() {
        let template = base();
        let derived = template
            .with_field("id")
            .with_interval(Duration::from_millis(10))
            .with_max_retries(7)
            .unwrap();

        assert_eq!(template.descriptor().result_field(), None);
        assert_eq!(template.policy().max_retries(), 3);
        assert_eq!(template.policy().interval(), Duration::from_millis(2000));
        assert_eq!(derived.descriptor().result_field(), Some("id"));
        assert_eq!(derived.policy().max_retries(), 7);
        assert_eq!(derived.descriptor().params()["owner"], "acme");
    }

    #[test]
    fn test_invalid_max_retries_fails_at_configuration() {
        assert!(matches!(
            base().with_max_retries(0),
            Err(ChainError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_run_with_returns_full_payload() {
        let mock = MockClient::new().reply(REPO, json!({"id": 1, "name": "site"}));
        let data = base().run_with(&mock).await.unwrap();
        assert_eq!(data, json!({"id": 1, "name": "site"}));
        assert_eq!(mock.calls()[0].params["repo"], "site");
    }

    #[tokio::test]
    async fn test_projection_missing_field_is_distinct() {
        let mock = MockClient::new().reply(REPO, json!({"id": 1}));
        let result = base().with_field("default_branch").run_with(&mock).await;
        assert!(matches!(result, Err(ChainError::MissingField { ref field }) if field == "default_branch"));
        assert_eq!(mock.call_count(REPO), 1);
    }

    #[tokio::test]
    async fn test_projection_keeps_null_values() {
        let mock = MockClient::new().reply(REPO, json!({"description": null}));
        let data = base().with_field("description").run_with(&mock).await.unwrap();
        assert_eq!(data, Value::Null);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let mock = MockClient::new()
            .fail(REPO, 502, "Bad Gateway")
            .fail(REPO, 503, "Unavailable")
            .reply(REPO, json!({"id": 9}));
        let data = base().with_field("id").run_with(&mock).await.unwrap();
        assert_eq!(data, 9);
        assert_eq!(mock.call_count(REPO), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mock = MockClient::new().fail(REPO, 404, "Not Found");
        let result = base().with_max_retries(5).unwrap().run_with(&mock).await;
        assert!(matches!(result, Err(ChainError::NotFound { .. })));
        assert_eq!(mock.call_count(REPO), 1);
    }

    #[tokio::test]
    async fn test_unbound_placeholder_fails_before_any_call() {
        let mock = MockClient::new().reply(REPO, json!({"id": 1}));
        let sleeper = TrackingSleeper::new();
        let request = Request::route(REPO)
            .param("owner", "acme")
            .with_sleeper(Arc::new(sleeper.clone()));

        let result = request.run_with(&mock).await;
        let err = result.unwrap_err();
        assert!(matches!(err, ChainError::InvalidConfig(_)));
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(mock.calls().is_empty());
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_route_fails_before_any_call() {
        let mock = MockClient::new();
        let result = Request::route("repos")
            .with_sleeper(Arc::new(InstantSleeper))
            .run_with(&mock)
            .await;
        assert!(matches!(result, Err(ChainError::InvalidConfig(_))));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rest_client_missing_placeholder_not_retried() {
        let client = RestClient::builder("http://127.0.0.1:1")
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        let sleeper = TrackingSleeper::new();
        let request = Request::route(REPO)
            .param("owner", "acme")
            .with_interval(Duration::from_secs(2))
            .with_sleeper(Arc::new(sleeper.clone()));

        let err = request.run_with(&client).await.unwrap_err();
        assert!(matches!(err, ChainError::InvalidConfig(ref msg) if msg.contains("repo")));
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bound_operation() {
        let mock = MockClient::new().reply(
            "GET /repos/{owner}/{repo}/git/ref/{ref}",
            json!({"object": {"sha": "abc123"}}),
        );
        let request = Request::new(Operation::bound("main_ref", |client, params| {
            Box::pin(async move {
                let owner = params["owner"].as_str().unwrap_or_default();
                let repo = params["repo"].as_str().unwrap_or_default();
                client.get_ref(owner, repo, "heads/main").await
            })
        }))
        .param("owner", "acme")
        .param("repo", "site")
        .with_field("object");

        let object = request.run_with(&mock).await.unwrap();
        assert_eq!(object["sha"], "abc123");
        assert_eq!(request.descriptor().operation().name(), "main_ref");
    }
}
