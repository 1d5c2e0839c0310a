use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use octochain::client::{MockClient, Params};
use octochain::sleeper::InstantSleeper;
use octochain::{
    ChainError, ExecutionContext, FnObserver, Request, RunState, Signal, SignalKind, Task,
    TaskChain,
};
use serde_json::{json, Value};

const REPO: &str = "GET /repos/{owner}/{repo}";

fn counted(label: &str, calls: &Arc<AtomicUsize>, fail: bool) -> octochain::task::TaskBuilder {
    let calls = calls.clone();
    Task::builder(label, move |_ctx| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if fail {
                Err(ChainError::Http {
                    status: 500,
                    message: "boom".into(),
                    retry_after: None,
                })
            } else {
                Ok(json!("ok"))
            }
        }
    })
    .max_retries(2)
    .sleeper(Arc::new(InstantSleeper))
}

struct Counters {
    first: Arc<AtomicUsize>,
    second: Arc<AtomicUsize>,
    third: Arc<AtomicUsize>,
}

fn three_tasks(second_observer: Option<Arc<dyn octochain::SignalObserver>>) -> (TaskChain, Counters) {
    let counters = Counters {
        first: Arc::new(AtomicUsize::new(0)),
        second: Arc::new(AtomicUsize::new(0)),
        third: Arc::new(AtomicUsize::new(0)),
    };
    let mut second = counted("second", &counters.second, true);
    if let Some(observer) = second_observer {
        second = second.on_failure(observer);
    }
    let chain = TaskChain::new("flow")
        .with_task(counted("first", &counters.first, false).build().unwrap())
        .unwrap()
        .with_task(second.build().unwrap())
        .unwrap()
        .with_task(counted("third", &counters.third, false).build().unwrap())
        .unwrap();
    (chain, counters)
}

#[tokio::test]
async fn failing_task_aborts_chain() {
    let (mut chain, counters) = three_tasks(None);
    let run = chain.run(Params::new()).await;

    assert_eq!(run.state, RunState::Aborted { at: "second".into() });
    assert_eq!(
        run.context.steps.labels().collect::<Vec<_>>(),
        vec!["first", "second"]
    );
    assert!(!run.context.steps.get("second").unwrap().is_success());
    assert_eq!(counters.first.load(Ordering::SeqCst), 1);
    assert_eq!(counters.second.load(Ordering::SeqCst), 2);
    assert_eq!(counters.third.load(Ordering::SeqCst), 0);
    assert!(chain.is_broken());
}

#[tokio::test]
async fn observer_override_keeps_chain_running() {
    let keep_going = Arc::new(FnObserver(|signal: &Signal| {
        assert_eq!(signal.kind(), SignalKind::Failed);
        signal.set_abort(false);
    }));
    let (mut chain, counters) = three_tasks(Some(keep_going));
    let run = chain.run(Params::new()).await;

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.context.steps.len(), 3);
    assert_eq!(counters.third.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rerun_starts_with_fresh_steps() {
    let (mut chain, _) = three_tasks(None);
    let first = chain.run(Params::new()).await;
    chain.remove_task("second").unwrap();
    let second = chain.run(Params::new()).await;

    assert_eq!(first.context.steps.len(), 2);
    assert_eq!(second.state, RunState::Completed);
    assert_eq!(
        second.context.steps.labels().collect::<Vec<_>>(),
        vec!["first", "third"]
    );
}

#[tokio::test]
async fn later_task_wins_input_collision() {
    let noop = |label: &str, x: Value| {
        Task::builder(label, |_ctx| async { Ok(Value::Null) })
            .input("x", x)
            .build()
            .unwrap()
    };
    let chain = TaskChain::new("inputs")
        .with_task(noop("a", json!("from-a")))
        .unwrap()
        .with_task(noop("b", json!("from-b")))
        .unwrap();

    let template = chain.input_template();
    assert_eq!(template.len(), 1);
    assert_eq!(*template["x"], json!("from-b"));
}

#[test]
fn duplicate_add_leaves_chain_unchanged() {
    let noop = || Task::builder("same", |_ctx| async { Ok(Value::Null) }).build().unwrap();
    let mut chain = TaskChain::new("dupes").with_task(noop()).unwrap();

    assert!(matches!(chain.add_task(noop()), Err(ChainError::DuplicateLabel(_))));
    assert_eq!(chain.len(), 1);
}

#[test]
fn insert_relative_to_unknown_label_fails() {
    let noop = |l: &str| Task::builder(l, |_ctx| async { Ok(Value::Null) }).build().unwrap();
    let mut chain = TaskChain::new("order")
        .with_task(noop("a"))
        .unwrap()
        .with_task(noop("b"))
        .unwrap();

    assert!(chain.insert_before_task("missing", noop("c")).is_err());
    assert!(chain.insert_after_task("missing", noop("c")).is_err());
    assert_eq!(chain.labels(), vec!["a", "b"]);
}

#[test]
fn template_inputs_are_copied_per_call() {
    let task = Task::builder("t", |_ctx| async { Ok(Value::Null) })
        .input("shared", json!({"list": [1]}))
        .template_input("copied", json!({"list": [2]}))
        .build()
        .unwrap();

    let (a, b) = (task.get_inputs(), task.get_inputs());
    assert!(Arc::ptr_eq(&a["shared"], &b["shared"]));
    assert!(!Arc::ptr_eq(&a["copied"], &b["copied"]));
}

#[tokio::test]
async fn tasks_drive_requests_through_client() {
    let mock = Arc::new(
        MockClient::new()
            .fail(REPO, 502, "Bad Gateway")
            .reply(REPO, json!({"default_branch": "main", "id": 3})),
    );
    let branch = Request::route(REPO)
        .with_field("default_branch")
        .with_interval(Duration::ZERO)
        .with_sleeper(Arc::new(InstantSleeper));

    let client = mock.clone();
    let lookup = Task::builder("branch", move |ctx: ExecutionContext| {
        let client = client.clone();
        let request = branch
            .param("owner", ctx.input("owner").cloned().unwrap_or_default())
            .param("repo", ctx.input("repo").cloned().unwrap_or_default());
        async move { request.run_with(client.as_ref()).await }
    })
    .input("owner", json!("acme"))
    .input("repo", json!("site"))
    .max_retries(1)
    .build()
    .unwrap();

    let mut chain = TaskChain::new("sync").with_task(lookup).unwrap();
    let run = chain.run(Params::new()).await;

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.context.data("branch"), Some(&json!("main")));
    assert_eq!(mock.call_count(REPO), 2);
}
