//! # octochain
//!
//! Retrying REST calls and labelled task chains for automating repository
//! work: lookups, file contents, git refs and Actions secrets.
//!
//! The crate provides the execution core. It covers a **retry engine** with
//! pure exponential backoff, an immutable **request builder**, and
//! **tasks** that signal their outcome to observers. **Task chains** run
//! tasks in order and stop when a task aborts.
//!
//! ## Core Concepts
//!
//! - **[`RetryPolicy`]** / [`run_with_retries`]: attempt limit, base
//!   interval and a stop predicate deciding which errors are terminal.
//! - **[`Request`]**: one remote operation plus its policy; every `with_*`
//!   returns a new value.
//! - **[`Task`]**: a labelled async action run under its own policy that
//!   emits a [`Signal`](events::Signal) when done.
//! - **[`TaskChain`]**: ordered, label-unique tasks sharing one
//!   [`ExecutionContext`].
//! - **[`Outcome`]**: `Success { data }` or `Failure { error }`, recorded
//!   per task in `context.steps`.
//! - **[`ApiClient`]**: the remote capability; [`RestClient`] speaks
//!   HTTPS, [`MockClient`] answers from canned replies.
//!
//! ## Quick Start
//!
//! ```no_run
//! use octochain::auth::{shared_client, Identity};
//! use octochain::{Request, Task, TaskChain};
//! use octochain::client::Params;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = shared_client(&Identity::User { token: "ghp_...".into() }).await?;
//!
//!     let branch = Request::route("GET /repos/{owner}/{repo}").with_field("default_branch");
//!
//!     let lookup = {
//!         let client = client.clone();
//!         Task::builder("default-branch", move |ctx| {
//!             let client = client.clone();
//!             let request = branch
//!                 .param("owner", ctx.input("owner").cloned().unwrap_or_default())
//!                 .param("repo", ctx.input("repo").cloned().unwrap_or_default());
//!             async move { request.run_with(client.as_ref()).await }
//!         })
//!         .input("owner", json!("acme"))
//!         .input("repo", json!("site"))
//!         .max_retries(1)
//!         .build()?
//!     };
//!
//!     let mut chain = TaskChain::new("inspect").with_task(lookup)?;
//!     let run = chain.run(Params::new()).await;
//!     println!("{:?}: {:?}", run.state, run.context.data("default-branch"));
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod chain;
pub mod client;
pub mod context;
pub mod error;
pub mod events;
pub mod outcome;
pub mod request;
pub mod retry;
pub mod secrets;
pub mod sleeper;
pub mod task;

pub use chain::{ChainRun, RunState, TaskChain};
pub use client::{ApiClient, ApiResponse, MockClient, RestClient};
pub use context::ExecutionContext;
pub use error::{ChainError, Result};
pub use events::{FnObserver, Signal, SignalKind, SignalObserver};
pub use outcome::{ErrorInfo, ErrorKind, Outcome};
pub use request::{Operation, Request};
pub use retry::{run_with_retries, RetryPolicy, Verdict};
pub use task::Task;
