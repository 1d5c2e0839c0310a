//! Run a fallible async operation with exponential backoff.
//!
//! [`run_with_retries`] is the single retry loop used by
//! [`Request`](crate::request::Request) and [`Task`](crate::task::Task).
//!
//! Semantics:
//! - `max_retries` counts total attempts, the first one included.
//! - Configuration errors ([`ErrorKind::Config`]) end the loop at once and
//!   never reach the predicate; retrying cannot fix them.
//! - Otherwise the [`StopPredicate`] sees the error first. A
//!   [`Verdict::Stop`] ends the loop at once with the error it carries, no
//!   matter how many attempts remain.
//! - Otherwise, once `max_retries` attempts have failed, the loop returns
//!   [`ChainError::RetriesExhausted`] wrapping the last error.
//! - The delay before attempt `n + 1` is `interval * 2^(n - 1)`. There is no
//!   jitter and no delay before the first attempt.
//!
//! ```
//! use octochain::retry::{run_with_retries, RetryPolicy};
//! use octochain::sleeper::InstantSleeper;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::new(4, Duration::from_millis(100))
//!     .unwrap()
//!     .with_sleeper(Arc::new(InstantSleeper));
//! let mut calls = 0;
//! let value = run_with_retries(
//!     || {
//!         calls += 1;
//!         let n = calls;
//!         async move {
//!             if n < 3 {
//!                 Err(octochain::ChainError::Other("flaky".into()))
//!             } else {
//!                 Ok(n)
//!             }
//!         }
//!     },
//!     &policy,
//! )
//! .await
//! .unwrap();
//! assert_eq!(value, 3);
//! # });
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{invalid_config, ChainError, Result};
use crate::outcome::ErrorKind;
use crate::sleeper::{Sleeper, TokioSleeper};

/// Attempts used when nothing else is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base backoff interval used when nothing else is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2000);

/// Upper bound on `max_retries`. Larger values are rejected, not clamped;
/// past this point the doubling backoff is measured in years.
pub const MAX_RETRIES_LIMIT: u32 = 30;

/// Smallest base interval a [`Task`](crate::task::Task) accepts. Requests
/// built directly have no floor.
pub const MIN_TASK_INTERVAL: Duration = Duration::from_millis(500);

/// Decision returned by a [`StopPredicate`].
///
/// Both arms carry the error to surface; the predicate may pass the
/// original through or substitute its own.
#[derive(Debug)]
pub enum Verdict {
    /// Keep trying (budget permitting).
    Retry(ChainError),
    /// Give up now and report this error.
    Stop(ChainError),
}

/// Classifies a failed attempt as retryable or terminal.
pub type StopPredicate = Arc<dyn Fn(ChainError) -> Verdict + Send + Sync>;

/// Default classification: not-found errors are terminal, everything else
/// is retried. The error passes through unchanged.
pub fn stop_on_not_found(err: ChainError) -> Verdict {
    if err.is_not_found() {
        Verdict::Stop(err)
    } else {
        Verdict::Retry(err)
    }
}

/// Attempt limit, base interval, stop predicate and sleeper for one
/// retry loop.
///
/// # Example
///
/// ```
/// use octochain::retry::{RetryPolicy, Verdict};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_max_retries(5)
///     .unwrap()
///     .with_interval(Duration::from_millis(250))
///     .with_stop_predicate(|err| match err.status() {
///         Some(401) | Some(403) => Verdict::Stop(err),
///         _ => Verdict::Retry(err),
///     });
///
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(1000));
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    interval: Duration,
    stop: StopPredicate,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    /// Create a policy with the default stop predicate.
    ///
    /// Fails if `max_retries` is zero or above [`MAX_RETRIES_LIMIT`].
    pub fn new(max_retries: u32, interval: Duration) -> Result<Self> {
        Self::default()
            .with_max_retries(max_retries)
            .map(|p| p.with_interval(interval))
    }

    /// Total attempts allowed.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Base backoff interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Result<Self> {
        check_max_retries(max_retries)?;
        self.max_retries = max_retries;
        Ok(self)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stop_predicate(
        mut self,
        f: impl Fn(ChainError) -> Verdict + Send + Sync + 'static,
    ) -> Self {
        self.stop = Arc::new(f);
        self
    }

    /// Replace the sleeper used for backoff delays.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    ///
    /// `interval * 2^(attempt - 1)`; zero for attempt 0. Saturates at
    /// `Duration::MAX` instead of overflowing.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        2u32.checked_pow(attempt - 1)
            .and_then(|factor| self.interval.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    pub(crate) fn classify(&self, err: ChainError) -> Verdict {
        (self.stop)(err)
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, 2 s base interval, not-found stops, tokio timer.
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            interval: DEFAULT_INTERVAL,
            stop: Arc::new(stop_on_not_found),
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("interval", &self.interval)
            .field("sleeper", &self.sleeper)
            .field("stop", &"<predicate>")
            .finish()
    }
}

pub(crate) fn check_max_retries(max_retries: u32) -> Result<()> {
    if max_retries == 0 {
        return Err(invalid_config("max_retries must be at least 1"));
    }
    if max_retries > MAX_RETRIES_LIMIT {
        return Err(invalid_config(format!(
            "max_retries must be at most {} (got {})",
            MAX_RETRIES_LIMIT, max_retries
        )));
    }
    Ok(())
}

/// Run `operation` until it succeeds, the stop predicate ends the loop,
/// or the policy's attempt budget is spent.
///
/// The terminal failure is logged once at `warn` before it is returned.
pub async fn run_with_retries<T, F, Fut>(mut operation: F, policy: &RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if err.kind() == ErrorKind::Config {
            // Already logged at `error!` where it was raised.
            debug!(attempt, error = %err, "configuration error; not retrying");
            return Err(err);
        }

        match policy.classify(err) {
            Verdict::Stop(err) => {
                warn!(
                    attempt,
                    status = ?err.status(),
                    error = %err,
                    "operation failed with a non-retryable error"
                );
                return Err(err);
            }
            Verdict::Retry(err) if attempt >= policy.max_retries => {
                let err = ChainError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                };
                warn!(
                    attempts = attempt,
                    status = ?err.status(),
                    error = %err,
                    "operation failed; retries exhausted"
                );
                return Err(err);
            }
            Verdict::Retry(err) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    attempt,
                    delay = ?delay,
                    error = %err,
                    "attempt failed; backing off"
                );
                policy.sleeper.sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
