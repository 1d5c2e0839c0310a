//! Mock client for testing without the remote API.
//!
//! [`MockClient`] answers each route with pre-configured replies in order,
//! allowing downstream consumers to write deterministic tests against this
//! crate. Every call is recorded.
//!
//! # Example
//!
//! ```
//! use octochain::client::{ApiClient, MockClient};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let mock = MockClient::new()
//!     .fail("GET /repos/{owner}/{repo}", 502, "Bad Gateway")
//!     .reply("GET /repos/{owner}/{repo}", json!({"id": 7, "default_branch": "main"}));
//!
//! assert!(mock.get_repo("acme", "site").await.is_err());
//! let repo = mock.get_repo("acme", "site").await.unwrap();
//! assert_eq!(repo.data["id"], 7);
//! assert_eq!(mock.call_count("GET /repos/{owner}/{repo}"), 2);
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{status_error, ApiClient, ApiResponse, Params};
use crate::error::Result;
use crate::ChainError;

/// One canned answer.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// 200 with this payload.
    Data(Value),
    /// Non-success status with a message (404 maps to `NotFound`).
    Status { status: u16, message: String },
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub route: String,
    pub params: Params,
}

/// A test client that answers routes with canned replies.
///
/// Replies for a route are consumed in order; the last one repeats once the
/// queue is down to a single entry. Routes with no replies answer
/// `NotFound`.
#[derive(Debug, Default)]
pub struct MockClient {
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `route` (builder style).
    pub fn with_reply(self, route: impl Into<String>, reply: MockReply) -> Self {
        self.push_reply(route, reply);
        self
    }

    /// Queue a successful payload for `route`.
    pub fn reply(self, route: impl Into<String>, data: Value) -> Self {
        self.with_reply(route, MockReply::Data(data))
    }

    /// Queue a failing status for `route`.
    pub fn fail(self, route: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        self.with_reply(
            route,
            MockReply::Status {
                status,
                message: message.into(),
            },
        )
    }

    /// Queue a reply for `route` (mutation style).
    pub fn push_reply(&self, route: impl Into<String>, reply: MockReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.entry(route.into()).or_default().push_back(reply);
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of calls made to `route`.
    pub fn call_count(&self, route: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|call| call.route == route).count())
            .unwrap_or(0)
    }

    fn next_reply(&self, route: &str) -> Option<MockReply> {
        let mut replies = self.replies.lock().ok()?;
        let queue = replies.get_mut(route)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl ApiClient for MockClient {
    async fn request(&self, route: &str, params: &Params) -> Result<ApiResponse> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                route: route.to_string(),
                params: params.clone(),
            });
        }
        match self.next_reply(route) {
            Some(MockReply::Data(data)) => Ok(ApiResponse::ok(data)),
            Some(MockReply::Status { status, message }) => {
                Err(status_error(status, message, None, route))
            }
            None => Err(ChainError::NotFound {
                resource: route.to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
