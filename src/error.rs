use std::time::Duration;
use thiserror::Error;

use crate::outcome::ErrorKind;

/// Errors produced by requests, tasks, chains and their collaborators.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON encoding or decoding failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote API answered with a non-success status.
    ///
    /// `message` is the API's own `message` field when the body is JSON,
    /// otherwise the raw body text. `retry_after` is parsed from the
    /// `Retry-After` header when present.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code (e.g. 403, 422, 502).
        status: u16,
        /// Remote diagnostic message.
        message: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// The remote resource does not exist (HTTP 404 or equivalent).
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// A response succeeded but lacks the field the request projects.
    #[error("Response is missing expected field '{field}'")]
    MissingField { field: String },

    /// Every attempt failed and the stop predicate never ended the loop.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ChainError>,
    },

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A task label is empty or contains whitespace.
    #[error("Invalid task label '{0}': labels must be non-empty and contain no whitespace")]
    InvalidLabel(String),

    /// A task label is already used in the chain.
    #[error("Task label '{0}' already exists in this chain")]
    DuplicateLabel(String),

    /// No task in the chain carries the label.
    #[error("No task labelled '{0}' in this chain")]
    UnknownLabel(String),

    /// The task still belongs to another chain.
    #[error("Task '{0}' is already attached to a chain")]
    TaskAttached(String),

    /// OAuth code/refresh-token exchange failed.
    #[error("Credential exchange failed: {0}")]
    Credential(String),

    /// Secret sealing failed.
    #[error("Secret encryption failed: {0}")]
    Encryption(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl ChainError {
    /// Classify the error for reporting and stop-predicate decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::Request(_) | ChainError::Json(_) | ChainError::Http { .. } => {
                ErrorKind::Transport
            }
            ChainError::NotFound { .. } => ErrorKind::NotFound,
            ChainError::MissingField { .. } => ErrorKind::Projection,
            ChainError::RetriesExhausted { .. } => ErrorKind::Exhausted,
            ChainError::InvalidConfig(_) => ErrorKind::Config,
            ChainError::InvalidLabel(_)
            | ChainError::DuplicateLabel(_)
            | ChainError::UnknownLabel(_)
            | ChainError::TaskAttached(_) => ErrorKind::Structural,
            ChainError::Credential(_) => ErrorKind::Credential,
            ChainError::Encryption(_) => ErrorKind::Encryption,
            ChainError::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether this is a not-found class error.
    ///
    /// Looks through `RetriesExhausted` and treats a transport-level
    /// `reqwest` 404 the same as [`ChainError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        match self {
            ChainError::NotFound { .. } => true,
            ChainError::Http { status, .. } => *status == 404,
            ChainError::Request(e) => e.status().is_some_and(|s| s.as_u16() == 404),
            ChainError::RetriesExhausted { last, .. } => last.is_not_found(),
            _ => false,
        }
    }

    /// Remote HTTP status behind this error, when one is known.
    pub fn status(&self) -> Option<u16> {
        match self {
            ChainError::Http { status, .. } => Some(*status),
            ChainError::NotFound { .. } => Some(404),
            ChainError::Request(e) => e.status().map(|s| s.as_u16()),
            ChainError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ChainError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ChainError>() {
            Ok(inner) => inner,
            Err(other) => ChainError::Other(format!("{:#}", other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// Build an [`ChainError::InvalidConfig`] and log it where it is raised.
pub(crate) fn invalid_config(message: impl Into<String>) -> ChainError {
    let message = message.into();
    tracing::error!(error = %message, "rejected configuration");
    ChainError::InvalidConfig(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            ChainError::NotFound { resource: "repo".into() }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ChainError::MissingField { field: "sha".into() }.kind(),
            ErrorKind::Projection
        );
        assert_eq!(
            ChainError::DuplicateLabel("a".into()).kind(),
            ErrorKind::Structural
        );
        assert_eq!(
            ChainError::Http { status: 502, message: "bad gateway".into(), retry_after: None }
                .kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn test_not_found_through_exhaustion() {
        let err = ChainError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ChainError::Http {
                status: 404,
                message: "Not Found".into(),
                retry_after: None,
            }),
        };
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_anyhow_roundtrip_keeps_variant() {
        let err: anyhow::Error = ChainError::MissingField { field: "sha".into() }.into();
        let back: ChainError = err.into();
        assert!(matches!(back, ChainError::MissingField { .. }));

        let other: ChainError = anyhow::anyhow!("boom").into();
        assert!(matches!(other, ChainError::Other(ref m) if m == "boom"));
    }
}
