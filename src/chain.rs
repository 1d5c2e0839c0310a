//! Ordered, label-addressed sequence of tasks.
//!
//! [`TaskChain`] runs its tasks one after another against a shared
//! [`ExecutionContext`]. Each task's outcome is recorded under its label
//! before the chain checks its abort flag; once the flag is set the
//! remaining tasks are skipped and never appear in `steps`.
//! There is no retry at the chain level.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, info_span, Instrument};

use crate::client::Params;
use crate::context::{ExecutionContext, Inputs};
use crate::error::{ChainError, Result};
use crate::events::SignalObserver;
use crate::task::{check_label, Task};

/// Abort flag shared between a chain and its attached tasks.
#[derive(Debug, Default)]
pub struct ChainState {
    aborted: AtomicBool,
}

impl ChainState {
    pub(crate) fn set_aborted(&self, value: bool) {
        self.aborted.store(value, Ordering::SeqCst);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Every task ran.
    Completed,
    /// The abort flag was set after the task labelled `at` finished.
    Aborted { at: String },
}

/// Final context and end state of one [`TaskChain::run`].
#[derive(Debug, Clone)]
pub struct ChainRun {
    pub context: ExecutionContext,
    pub state: RunState,
}

impl ChainRun {
    pub fn is_aborted(&self) -> bool {
        matches!(self.state, RunState::Aborted { .. })
    }
}

/// A sequential chain of tasks with unique labels.
///
/// Structural operations check everything before touching the chain, so a
/// failed call leaves order and membership unchanged.
///
/// `run` takes `&mut self`: one chain instance has at most one run in
/// flight.
///
/// # Example
///
/// ```
/// use octochain::chain::{RunState, TaskChain};
/// use octochain::client::Params;
/// use octochain::task::Task;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let mut chain = TaskChain::new("sync")
///     .with_task(Task::builder("fetch", |_| async { Ok(json!({"sha": "abc"})) }).build().unwrap())
///     .unwrap()
///     .with_task(Task::builder("report", |ctx| async move {
///         Ok(ctx.data("fetch").cloned().unwrap_or_default())
///     }).build().unwrap())
///     .unwrap();
///
/// let run = chain.run(Params::new()).await;
/// assert_eq!(run.state, RunState::Completed);
/// assert_eq!(run.context.data("report"), Some(&json!({"sha": "abc"})));
/// # });
/// ```
pub struct TaskChain {
    name: String,
    tasks: Vec<Task>,
    state: Arc<ChainState>,
    observers: Vec<Arc<dyn SignalObserver>>,
}

impl TaskChain {
    /// Create a new empty chain.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            state: Arc::new(ChainState::default()),
            observers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a task (builder style).
    pub fn with_task(mut self, task: Task) -> Result<Self> {
        self.add_task(task)?;
        Ok(self)
    }

    /// Append a task (mutation style).
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        self.admit(&task)?;
        self.place(self.tasks.len(), task);
        Ok(())
    }

    /// Insert `task` immediately before the task labelled `label`.
    pub fn insert_before_task(&mut self, label: &str, task: Task) -> Result<()> {
        let index = self.position(label)?;
        self.admit(&task)?;
        self.place(index, task);
        Ok(())
    }

    /// Insert `task` immediately after the task labelled `label`.
    pub fn insert_after_task(&mut self, label: &str, task: Task) -> Result<()> {
        let index = self.position(label)?;
        self.admit(&task)?;
        self.place(index + 1, task);
        Ok(())
    }

    /// Detach and return the task labelled `label`.
    pub fn remove_task(&mut self, label: &str) -> Result<Task> {
        let index = self.position(label)?;
        let mut task = self.tasks.remove(index);
        task.detach();
        debug!(chain = %self.name, task = %label, "task removed");
        Ok(task)
    }

    /// Exact-match lookup.
    pub fn get_task(&self, label: &str) -> Result<&Task> {
        let index = self.position(label)?;
        Ok(&self.tasks[index])
    }

    pub fn get_task_mut(&mut self, label: &str) -> Result<&mut Task> {
        let index = self.position(label)?;
        Ok(&mut self.tasks[index])
    }

    /// Every task's [`Task::get_inputs`] folded into one map. Later tasks
    /// win on name collisions.
    pub fn input_template(&self) -> Inputs {
        let mut template = Inputs::new();
        for task in &self.tasks {
            template.extend(task.get_inputs());
        }
        template
    }

    /// Set (or clear) the abort flag.
    pub fn break_chain(&self, value: bool) {
        self.state.set_aborted(value);
    }

    /// Whether the abort flag is set.
    pub fn is_broken(&self) -> bool {
        self.state.is_aborted()
    }

    /// Register an observer notified for every task's signals, after the
    /// task's own observers.
    pub fn observe(&mut self, observer: Arc<dyn SignalObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Labels in execution order.
    pub fn labels(&self) -> Vec<&str> {
        self.tasks.iter().map(Task::label).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Run every task in order against a fresh context.
    ///
    /// `inputs` are merged over [`TaskChain::input_template`]. The abort
    /// flag is cleared first; after each task its outcome is recorded and
    /// the flag is checked.
    pub async fn run(&mut self, inputs: Params) -> ChainRun {
        self.state.set_aborted(false);

        let mut merged = self.input_template();
        merged.extend(inputs.into_iter().map(|(k, v)| (k, Arc::new(v))));
        let mut context = ExecutionContext::new(merged);

        let span = info_span!("chain", name = %self.name, tasks = self.tasks.len());
        async {
            for task in &self.tasks {
                let outcome = task.execute(&context, &self.observers).await;
                context.steps.insert(task.label(), outcome);

                if self.state.is_aborted() {
                    info!(chain = %self.name, task = %task.label(), "chain aborted");
                    return ChainRun {
                        context,
                        state: RunState::Aborted {
                            at: task.label().to_string(),
                        },
                    };
                }
            }
            debug!(chain = %self.name, steps = context.steps.len(), "chain completed");
            ChainRun {
                context,
                state: RunState::Completed,
            }
        }
        .instrument(span)
        .await
    }

    fn position(&self, label: &str) -> Result<usize> {
        check_label(label)?;
        self.tasks
            .iter()
            .position(|t| t.label() == label)
            .ok_or_else(|| {
                tracing::error!(chain = %self.name, label, "unknown task label");
                ChainError::UnknownLabel(label.to_string())
            })
    }

    /// Reject tasks that belong to a chain or reuse a label.
    fn admit(&self, task: &Task) -> Result<()> {
        if task.is_attached() {
            tracing::error!(chain = %self.name, task = %task.label(), "task already attached");
            return Err(ChainError::TaskAttached(task.label().to_string()));
        }
        if self.tasks.iter().any(|t| t.label() == task.label()) {
            tracing::error!(chain = %self.name, task = %task.label(), "duplicate task label");
            return Err(ChainError::DuplicateLabel(task.label().to_string()));
        }
        Ok(())
    }

    fn place(&mut self, index: usize, mut task: Task) {
        task.attach(Arc::clone(&self.state));
        debug!(chain = %self.name, task = %task.label(), index, "task added");
        self.tasks.insert(index, task);
    }
}

impl std::fmt::Debug for TaskChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskChain")
            .field("name", &self.name)
            .field("tasks", &self.labels())
            .field("aborted", &self.state.is_aborted())
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FnObserver, Signal};
    use serde_json::{json, Value};

    fn task(label: &str) -> Task {
        Task::builder(label, |_ctx| async { Ok(Value::Null) })
            .build()
            .unwrap()
    }

    fn chain(labels: &[&str]) -> TaskChain {
        let mut chain = TaskChain::new("test");
        for label in labels {
            chain.add_task(task(label)).unwrap();
        }
        chain
    }

    #[test]
    fn test_add_sets_back_reference() {
        let chain = chain(&["a", "b"]);
        assert_eq!(chain.labels(), vec!["a", "b"]);
        assert!(chain.get_task("a").unwrap().is_attached());
    }

    #[test]
    fn test_duplicate_label_rejected_without_mutation() {
        let mut chain = chain(&["a", "b"]);
        let err = chain.add_task(task("a")).unwrap_err();
        assert!(matches!(err, ChainError::DuplicateLabel(ref l) if l == "a"));
        assert_eq!(chain.len(), 2);

        let err = chain.insert_before_task("b", task("b")).unwrap_err();
        assert!(matches!(err, ChainError::DuplicateLabel(_)));
        assert_eq!(chain.labels(), vec!["a", "b"]);
    }

    #[test]
    fn test_insert_before_and_after() {
        let mut chain = chain(&["a", "c"]);
        chain.insert_before_task("c", task("b")).unwrap();
        chain.insert_after_task("c", task("d")).unwrap();
        chain.insert_before_task("a", task("start")).unwrap();
        assert_eq!(chain.labels(), vec!["start", "a", "b", "c", "d"]);
    }

    #[test]
    fn test_insert_with_unknown_label_leaves_order() {
        let mut chain = chain(&["a", "b"]);
        let err = chain.insert_after_task("zzz", task("c")).unwrap_err();
        assert!(matches!(err, ChainError::UnknownLabel(_)));
        assert_eq!(chain.labels(), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_clears_back_reference() {
        let mut chain = chain(&["a", "b"]);
        let removed = chain.remove_task("a").unwrap();
        assert!(!removed.is_attached());
        assert_eq!(chain.labels(), vec!["b"]);

        let mut other = TaskChain::new("other");
        other.add_task(removed).unwrap();
        assert!(other.get_task("a").unwrap().is_attached());
        assert!(matches!(chain.remove_task("a"), Err(ChainError::UnknownLabel(_))));
    }

    #[test]
    fn test_attached_clone_rejected() {
        let chain = chain(&["a"]);
        let copy = chain.get_task("a").unwrap().clone();
        let mut other = TaskChain::new("other");
        assert!(matches!(other.add_task(copy), Err(ChainError::TaskAttached(_))));
        assert!(other.is_empty());
    }

    #[test]
    fn test_get_task_label_checks() {
        let chain = chain(&["a"]);
        assert!(matches!(chain.get_task(""), Err(ChainError::InvalidLabel(_))));
        assert!(matches!(chain.get_task("a b"), Err(ChainError::InvalidLabel(_))));
        assert!(matches!(chain.get_task("b"), Err(ChainError::UnknownLabel(_))));
        assert_eq!(chain.get_task("a").unwrap().label(), "a");
    }

    #[test]
    fn test_input_template_later_wins() {
        let mut chain = TaskChain::new("t");
        chain
            .add_task(
                Task::builder("a", |_ctx| async { Ok(Value::Null) })
                    .input("x", json!(1))
                    .input("only_a", json!(true))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        chain
            .add_task(
                Task::builder("b", |_ctx| async { Ok(Value::Null) })
                    .input("x", json!(2))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let template = chain.input_template();
        assert_eq!(template.len(), 2);
        assert_eq!(*template["x"], json!(2));
    }

    #[test]
    fn test_break_chain() {
        let chain = chain(&["a"]);
        assert!(!chain.is_broken());
        chain.break_chain(true);
        assert!(chain.is_broken());
        chain.break_chain(false);
        assert!(!chain.is_broken());
    }

    #[tokio::test]
    async fn test_run_clears_stale_abort_flag() {
        let mut chain = chain(&["a", "b"]);
        chain.break_chain(true);
        let run = chain.run(Params::new()).await;
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.context.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_caller_inputs_override_template() {
        let mut chain = TaskChain::new("t");
        chain
            .add_task(
                Task::builder("echo", |ctx: ExecutionContext| async move {
                    Ok(ctx.input("x").cloned().unwrap_or_default())
                })
                .input("x", json!("default"))
                .build()
                .unwrap(),
            )
            .unwrap();

        let mut inputs = Params::new();
        inputs.insert("x".into(), json!("given"));
        let run = chain.run(inputs).await;
        assert_eq!(run.context.data("echo"), Some(&json!("given")));
    }

    #[tokio::test]
    async fn test_success_observer_can_break_chain() {
        let mut chain = chain(&["a", "b", "c"]);
        chain
            .get_task_mut("b")
            .unwrap()
            .observe(Arc::new(FnObserver(|s: &Signal| s.break_chain(true))));

        let run = chain.run(Params::new()).await;
        assert_eq!(run.state, RunState::Aborted { at: "b".into() });
        assert_eq!(run.context.steps.labels().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_chain_observers_see_every_task() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut chain = chain(&["a", "b"]);
        chain.observe(Arc::new(FnObserver(move |s: &Signal| {
            sink.lock().unwrap().push(s.label().to_string());
        })));

        chain.run(Params::new()).await;
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }
}
