//! Labelled units of work with their own retry policy and observers.
//!
//! A [`Task`] wraps an async action `ExecutionContext -> Result<Value>`.
//! Running it drives the action through [`run_with_retries`], then emits a
//! [`Signal`] to the task's observers. A failure signal aborts the owning
//! chain unless an observer overrides it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, debug_span, Instrument};

use crate::chain::ChainState;
use crate::context::{ExecutionContext, Inputs};
use crate::error::{invalid_config, ChainError, Result};
use crate::events::{dispatch, Signal, SignalKind, SignalObserver};
use crate::outcome::Outcome;
use crate::retry::{run_with_retries, RetryPolicy, StopPredicate, Verdict, MIN_TASK_INTERVAL};
use crate::sleeper::Sleeper;

/// The work a task performs. Called once per attempt with a copy of the
/// chain's context.
pub type Action = Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// One declared input: a name and its default value.
///
/// Template defaults are copied afresh for every [`Task::get_inputs`]
/// call; other defaults are shared.
#[derive(Debug, Clone)]
pub struct InputSpec {
    pub name: String,
    pub default: Arc<Value>,
    pub template: bool,
}

/// Labels are non-empty and contain no whitespace.
pub(crate) fn check_label(label: &str) -> Result<()> {
    if label.is_empty() || label.chars().any(char::is_whitespace) {
        tracing::error!(label, "rejected task label");
        return Err(ChainError::InvalidLabel(label.to_string()));
    }
    Ok(())
}

/// A named retry-engine invocation with lifecycle signals.
///
/// Build one with [`Task::builder`]. Cloning a task keeps its chain
/// membership, so a clone of an attached task cannot join another chain.
///
/// # Example
///
/// ```
/// use octochain::task::Task;
/// use octochain::context::ExecutionContext;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let task = Task::builder("greet", |ctx: ExecutionContext| async move {
///     let name = ctx.input_str("name").unwrap_or("world").to_string();
///     Ok(json!(format!("hello {}", name)))
/// })
/// .input("name", json!("octo"))
/// .build()
/// .unwrap();
///
/// let ctx = ExecutionContext::new(task.get_inputs());
/// let outcome = task.run(&ctx).await;
/// assert_eq!(outcome.data(), Some(&json!("hello octo")));
/// # });
/// ```
#[derive(Clone)]
pub struct Task {
    label: String,
    action: Action,
    inputs: Vec<InputSpec>,
    policy: RetryPolicy,
    observers: Vec<(Option<SignalKind>, Arc<dyn SignalObserver>)>,
    chain: Option<Arc<ChainState>>,
}

impl Task {
    /// Start building a task around `action`.
    pub fn builder<F, Fut>(label: impl Into<String>, action: F) -> TaskBuilder
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        TaskBuilder {
            label: label.into(),
            action: Arc::new(move |ctx| Box::pin(action(ctx))),
            inputs: Vec::new(),
            max_retries: None,
            interval: None,
            stop: None,
            sleeper: None,
            observers: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Declared inputs, in declaration order.
    pub fn inputs_spec(&self) -> &[InputSpec] {
        &self.inputs
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether the task currently belongs to a chain.
    pub fn is_attached(&self) -> bool {
        self.chain.is_some()
    }

    /// Register an observer for every signal.
    pub fn observe(&mut self, observer: Arc<dyn SignalObserver>) {
        self.observers.push((None, observer));
    }

    /// Materialise the declared inputs.
    ///
    /// Template defaults are deep-copied into a fresh allocation on every
    /// call; other defaults are returned by reference (`Arc::ptr_eq` holds
    /// across calls).
    pub fn get_inputs(&self) -> Inputs {
        self.inputs
            .iter()
            .map(|spec| {
                let value = if spec.template {
                    Arc::new(Value::clone(&spec.default))
                } else {
                    Arc::clone(&spec.default)
                };
                (spec.name.clone(), value)
            })
            .collect()
    }

    /// Run the action under the task's retry policy and signal the result.
    ///
    /// A failure, unless overridden by an observer, sets the owning chain's
    /// abort flag before this returns.
    pub async fn run(&self, ctx: &ExecutionContext) -> Outcome {
        self.execute(ctx, &[]).await
    }

    /// As [`Task::run`], with `extra` observers notified after the task's
    /// own.
    pub(crate) async fn execute(
        &self,
        ctx: &ExecutionContext,
        extra: &[Arc<dyn SignalObserver>],
    ) -> Outcome {
        let span = debug_span!("task", label = %self.label);
        async {
            let result = run_with_retries(|| (self.action)(ctx.clone()), &self.policy).await;
            let outcome = Outcome::from(result);
            self.signal(ctx, outcome.clone(), extra);
            outcome
        }
        .instrument(span)
        .await
    }

    fn signal(&self, ctx: &ExecutionContext, outcome: Outcome, extra: &[Arc<dyn SignalObserver>]) {
        let signal = Signal::new(&self.label, ctx, outcome, self.chain.clone());
        let kind = signal.kind();
        let own = self
            .observers
            .iter()
            .filter(|(filter, _)| filter.map_or(true, |k| k == kind))
            .map(|(_, observer)| observer);
        let abort = dispatch(&signal, own.chain(extra.iter()));

        debug!(task = %self.label, ok = kind == SignalKind::Succeeded, abort, "task signalled");
        if abort {
            signal.break_chain(true);
        }
    }

    pub(crate) fn attach(&mut self, chain: Arc<ChainState>) {
        self.chain = Some(chain);
    }

    pub(crate) fn detach(&mut self) {
        self.chain = None;
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("label", &self.label)
            .field("inputs", &self.inputs)
            .field("policy", &self.policy)
            .field("observers", &self.observers.len())
            .field("attached", &self.chain.is_some())
            .finish()
    }
}

/// Builder for [`Task`]. All checks run in [`TaskBuilder::build`].
pub struct TaskBuilder {
    label: String,
    action: Action,
    inputs: Vec<InputSpec>,
    max_retries: Option<u32>,
    interval: Option<Duration>,
    stop: Option<StopPredicate>,
    sleeper: Option<Arc<dyn Sleeper>>,
    observers: Vec<(Option<SignalKind>, Arc<dyn SignalObserver>)>,
}

impl TaskBuilder {
    /// Declare an input whose default is shared between runs.
    pub fn input(mut self, name: impl Into<String>, default: Value) -> Self {
        self.inputs.push(InputSpec {
            name: name.into(),
            default: Arc::new(default),
            template: false,
        });
        self
    }

    /// Declare an input whose default is copied for every run.
    pub fn template_input(mut self, name: impl Into<String>, default: Value) -> Self {
        self.inputs.push(InputSpec {
            name: name.into(),
            default: Arc::new(default),
            template: true,
        });
        self
    }

    /// Total attempts, 1 to [`MAX_RETRIES_LIMIT`](crate::retry::MAX_RETRIES_LIMIT).
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Base backoff interval, at least [`MIN_TASK_INTERVAL`].
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn stop_when(mut self, f: impl Fn(ChainError) -> Verdict + Send + Sync + 'static) -> Self {
        self.stop = Some(Arc::new(f));
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn observe(mut self, observer: Arc<dyn SignalObserver>) -> Self {
        self.observers.push((None, observer));
        self
    }

    /// Observer for success signals only.
    pub fn on_success(mut self, observer: Arc<dyn SignalObserver>) -> Self {
        self.observers.push((Some(SignalKind::Succeeded), observer));
        self
    }

    /// Observer for failure signals only.
    pub fn on_failure(mut self, observer: Arc<dyn SignalObserver>) -> Self {
        self.observers.push((Some(SignalKind::Failed), observer));
        self
    }

    pub fn build(self) -> Result<Task> {
        check_label(&self.label)?;
        if let Some(spec) = self.inputs.iter().find(|s| s.name.is_empty()) {
            return Err(invalid_config(format!(
                "task '{}' declares an input with an empty name (default {})",
                self.label, spec.default
            )));
        }

        let mut policy = RetryPolicy::default();
        if let Some(max) = self.max_retries {
            policy = policy.with_max_retries(max)?;
        }
        let interval = self.interval.unwrap_or(policy.interval());
        if interval < MIN_TASK_INTERVAL {
            return Err(invalid_config(format!(
                "task '{}' interval {:?} is below the {:?} minimum",
                self.label, interval, MIN_TASK_INTERVAL
            )));
        }
        policy = policy.with_interval(interval);
        if let Some(stop) = self.stop {
            policy = policy.with_stop_predicate(move |err| stop(err));
        }
        if let Some(sleeper) = self.sleeper {
            policy = policy.with_sleeper(sleeper);
        }

        Ok(Task {
            label: self.label,
            action: self.action,
            inputs: self.inputs,
            policy,
            observers: self.observers,
            chain: None,
        })
    }
}
