//! Tagged success/failure values recorded for every executed task.
//!
//! [`ChainError`] is the propagating error type, but it is neither `Clone`
//! nor serialisable. [`Outcome`] is the value form that lands in
//! [`ExecutionContext::steps`](crate::context::ExecutionContext) and in
//! signals: either the task's data or an [`ErrorInfo`] snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChainError;

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid builder or task parameters.
    Config,
    /// Transport or remote failure (retryable by default).
    Transport,
    /// The remote resource does not exist (terminal by default).
    NotFound,
    /// A projected response field was absent.
    Projection,
    /// Attempts ran out without the stop predicate ending the loop.
    Exhausted,
    /// Duplicate, missing or malformed labels; attached tasks.
    Structural,
    /// OAuth exchange failure.
    Credential,
    /// Secret sealing failure.
    Encryption,
    Other,
}

/// Cloneable snapshot of a [`ChainError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// Upstream HTTP status, for diagnosis only.
    pub status: Option<u16>,
    /// Upstream diagnostic detail (remote message, underlying cause).
    pub detail: Option<String>,
}

impl From<&ChainError> for ErrorInfo {
    fn from(err: &ChainError) -> Self {
        let detail = match err {
            ChainError::Http { message, .. } => Some(message.clone()),
            ChainError::RetriesExhausted { last, .. } => Some(last.to_string()),
            _ => None,
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            status: err.status(),
            detail,
        }
    }
}

impl From<ChainError> for ErrorInfo {
    fn from(err: ChainError) -> Self {
        Self::from(&err)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of one task execution: `Success { data }` or `Failure { error }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { data: Value },
    Failure { error: ErrorInfo },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Outcome::Success { data } => Some(data),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { error } => Some(error),
        }
    }
}

impl From<crate::error::Result<Value>> for Outcome {
    fn from(result: crate::error::Result<Value>) -> Self {
        match result {
            Ok(data) => Outcome::Success { data },
            Err(e) => Outcome::Failure { error: ErrorInfo::from(&e) },
        }
    }
}
