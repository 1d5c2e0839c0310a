//! Sync a file onto a fresh branch, against a mock API.
//!
//! Run with `RUST_LOG=octochain=debug cargo run --example repo_sync` to see
//! retries and signals.

use std::sync::Arc;
use std::time::Duration;

use octochain::client::{decode_content, params, ApiClient, FileUpdate, MockClient};
use octochain::sleeper::InstantSleeper;
use octochain::{ChainError, ExecutionContext, FnObserver, Signal, Task, TaskChain};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const OWNER: &str = "acme";
const REPO: &str = "site";

fn mock_api() -> MockClient {
    MockClient::new()
        .reply(
            "GET /repos/{owner}/{repo}",
            json!({"id": 1, "default_branch": "main"}),
        )
        .fail("GET /repos/{owner}/{repo}/git/ref/{ref}", 502, "Bad Gateway")
        .reply(
            "GET /repos/{owner}/{repo}/git/ref/{ref}",
            json!({"ref": "refs/heads/main", "object": {"sha": "9fceb02"}}),
        )
        .reply(
            "POST /repos/{owner}/{repo}/git/refs",
            json!({"ref": "refs/heads/docs-sync"}),
        )
        .reply(
            "GET /repos/{owner}/{repo}/contents/{path}",
            json!({"sha": "3d21ec5", "content": "IyBTaXRlCg==\n"}),
        )
        .reply(
            "PUT /repos/{owner}/{repo}/contents/{path}",
            json!({"commit": {"sha": "7638417"}}),
        )
}

fn step<F, Fut>(label: &str, action: F) -> Result<Task, ChainError>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = octochain::Result<serde_json::Value>> + Send + 'static,
{
    Task::builder(label, action)
        .input("owner", json!(OWNER))
        .input("repo", json!(REPO))
        .input("branch", json!("docs-sync"))
        .interval(Duration::from_millis(500))
        .sleeper(Arc::new(InstantSleeper))
        .build()
}

fn text(ctx: &ExecutionContext, name: &str) -> String {
    ctx.input_str(name).unwrap_or_default().to_string()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let api: Arc<dyn ApiClient> = Arc::new(mock_api());

    let client = api.clone();
    let base = step("base-sha", move |ctx| {
        let client = client.clone();
        async move {
            let repo = client.get_repo(&text(&ctx, "owner"), &text(&ctx, "repo")).await?;
            let branch = repo.data["default_branch"].as_str().unwrap_or("main").to_string();
            let head = client
                .get_ref(&text(&ctx, "owner"), &text(&ctx, "repo"), &format!("heads/{}", branch))
                .await?;
            Ok(head.data["object"]["sha"].clone())
        }
    })?;

    let client = api.clone();
    let branch = step("create-branch", move |ctx| {
        let client = client.clone();
        async move {
            let sha = ctx.data("base-sha").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let created = client
                .create_ref(
                    &text(&ctx, "owner"),
                    &text(&ctx, "repo"),
                    &format!("refs/heads/{}", text(&ctx, "branch")),
                    &sha,
                )
                .await?;
            Ok(created.data)
        }
    })?;

    let client = api.clone();
    let readme = step("update-readme", move |ctx| {
        let client = client.clone();
        async move {
            let current = client
                .get_content(&text(&ctx, "owner"), &text(&ctx, "repo"), "README.md", None)
                .await?;
            let body = decode_content(&current.data)?;
            let update = FileUpdate {
                owner: text(&ctx, "owner"),
                repo: text(&ctx, "repo"),
                path: "README.md".into(),
                content: format!("{}\nSynced by octochain.\n", body),
                branch: text(&ctx, "branch"),
                message: "docs: sync README".into(),
                sha: current.data["sha"].as_str().map(str::to_string),
            };
            Ok(client.put_content(&update).await?.data)
        }
    })?;

    let mut chain = TaskChain::new("repo-sync")
        .with_task(base)?
        .with_task(branch)?
        .with_task(readme)?;
    chain.observe(Arc::new(FnObserver(|signal: &Signal| {
        println!("[{}] {:?}", signal.label(), signal.kind());
    })));

    let run = chain
        .run(params([("branch", json!("docs-sync"))]))
        .await;
    println!("\nFinished: {:?}", run.state);
    println!("{}", serde_json::to_string_pretty(&run.context)?);
    Ok(())
}
