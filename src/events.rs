//! Task lifecycle signals and their observers.
//!
//! When a task finishes it emits a [`Signal`]: [`SignalKind::Succeeded`]
//! or [`SignalKind::Failed`]. Observers registered on the task (and on its
//! chain) are called synchronously, in registration order, with a deep copy
//! of the context.
//!
//! Each signal carries an abort decision for the owning chain. Success
//! defaults to "continue", failure to "abort". An observer may override the
//! decision with [`Signal::set_abort`]; an override that changes the value
//! takes effect at once and no further observers see the signal.

use std::cell::Cell;
use std::sync::Arc;

use crate::chain::ChainState;
use crate::context::ExecutionContext;
use crate::outcome::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Succeeded,
    Failed,
}

impl SignalKind {
    /// Abort decision a signal starts with.
    pub fn default_abort(self) -> bool {
        matches!(self, SignalKind::Failed)
    }
}

/// One lifecycle notification from a task.
pub struct Signal {
    kind: SignalKind,
    label: String,
    context: ExecutionContext,
    outcome: Outcome,
    abort: Cell<bool>,
    settled: Cell<bool>,
    chain: Option<Arc<ChainState>>,
}

impl Signal {
    pub(crate) fn new(
        label: &str,
        context: &ExecutionContext,
        outcome: Outcome,
        chain: Option<Arc<ChainState>>,
    ) -> Self {
        let kind = if outcome.is_success() {
            SignalKind::Succeeded
        } else {
            SignalKind::Failed
        };
        Self {
            kind,
            label: label.to_string(),
            context: context.snapshot(),
            outcome,
            abort: Cell::new(kind.default_abort()),
            settled: Cell::new(false),
            chain,
        }
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Label of the task that emitted the signal.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Copy of the context as it was when the task finished. The task's
    /// own outcome is in [`Signal::outcome`], not yet in `steps`.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Current abort decision.
    pub fn aborts_chain(&self) -> bool {
        self.abort.get()
    }

    /// Override the abort decision for this signal.
    ///
    /// Passing the current value is a no-op. A different value is applied
    /// immediately and ends observer notification for this signal.
    pub fn set_abort(&self, abort: bool) {
        if abort == self.abort.get() {
            return;
        }
        self.abort.set(abort);
        self.settled.set(true);
        if abort {
            self.break_chain(true);
        }
    }

    /// Set the owning chain's abort flag directly. No-op for a task that
    /// is not in a chain.
    pub fn break_chain(&self, value: bool) {
        if let Some(ref chain) = self.chain {
            chain.set_aborted(value);
        }
    }

    /// Whether the task belongs to a chain.
    pub fn in_chain(&self) -> bool {
        self.chain.is_some()
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("abort", &self.abort.get())
            .field("settled", &self.settled.get())
            .field("in_chain", &self.chain.is_some())
            .finish()
    }
}

/// Receives task signals.
///
/// # Example
///
/// ```
/// use octochain::events::{Signal, SignalKind, SignalObserver};
///
/// struct KeepGoing;
///
/// impl SignalObserver for KeepGoing {
///     fn on_signal(&self, signal: &Signal) {
///         if signal.kind() == SignalKind::Failed {
///             signal.set_abort(false);
///         }
///     }
/// }
/// ```
pub trait SignalObserver: Send + Sync {
    fn on_signal(&self, signal: &Signal);
}

/// A [`SignalObserver`] backed by a closure.
///
/// ```
/// use octochain::events::{FnObserver, Signal};
/// use std::sync::Arc;
///
/// let observer = Arc::new(FnObserver(|signal: &Signal| {
///     println!("{} finished, ok = {}", signal.label(), signal.outcome().is_success());
/// }));
/// ```
pub struct FnObserver<F: Fn(&Signal) + Send + Sync>(pub F);

impl<F: Fn(&Signal) + Send + Sync> SignalObserver for FnObserver<F> {
    fn on_signal(&self, signal: &Signal) {
        (self.0)(signal);
    }
}

/// Notify observers in order until one settles the signal; return the
/// final abort decision.
pub(crate) fn dispatch<'a>(
    signal: &Signal,
    observers: impl IntoIterator<Item = &'a Arc<dyn SignalObserver>>,
) -> bool {
    for observer in observers {
        observer.on_signal(signal);
        if signal.settled.get() {
            break;
        }
    }
    signal.abort.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ErrorInfo;
    use crate::ChainError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failed() -> Outcome {
        Outcome::Failure {
            error: ErrorInfo::from(ChainError::Other("boom".into())),
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Arc<dyn SignalObserver> {
        let counter = counter.clone();
        Arc::new(FnObserver(move |_: &Signal| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_defaults() {
        let ctx = ExecutionContext::default();
        let ok = Signal::new("a", &ctx, Outcome::Success { data: json!(1) }, None);
        assert_eq!(ok.kind(), SignalKind::Succeeded);
        assert!(!ok.aborts_chain());

        let err = Signal::new("a", &ctx, failed(), None);
        assert_eq!(err.kind(), SignalKind::Failed);
        assert!(err.aborts_chain());
    }

    #[test]
    fn test_override_stops_notification() {
        let ctx = ExecutionContext::default();
        let signal = Signal::new("a", &ctx, failed(), None);
        let after = Arc::new(AtomicUsize::new(0));
        let observers: Vec<Arc<dyn SignalObserver>> = vec![
            Arc::new(FnObserver(|s: &Signal| s.set_abort(false))),
            counting(&after),
        ];

        assert!(!dispatch(&signal, &observers));
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_value_override_keeps_notifying() {
        let ctx = ExecutionContext::default();
        let signal = Signal::new("a", &ctx, failed(), None);
        let after = Arc::new(AtomicUsize::new(0));
        let observers: Vec<Arc<dyn SignalObserver>> = vec![
            Arc::new(FnObserver(|s: &Signal| s.set_abort(true))),
            counting(&after),
            counting(&after),
        ];

        assert!(dispatch(&signal, &observers));
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_observer_sees_snapshot() {
        let mut ctx = ExecutionContext::default();
        ctx.inputs.insert("x".into(), Arc::new(json!([1, 2])));
        let signal = Signal::new("a", &ctx, Outcome::Success { data: json!(null) }, None);
        assert_eq!(signal.context(), &ctx);
        assert!(!Arc::ptr_eq(&signal.context().inputs["x"], &ctx.inputs["x"]));
    }
}
