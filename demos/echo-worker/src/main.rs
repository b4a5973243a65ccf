//! Reference process-mode worker — the default spawn target for
//! `WorkerProgram::Process` in tests and demos.
//!
//! ```text
//! echo-worker                Serve over stdio until the pool terminates us
//! ```
//!
//! Methods:
//!   add(a, b)            -> a + b
//!   echo(value)           -> value, emitting a "received" progress event first
//!   delay(ms, value)      -> value, after sleeping ms milliseconds
//!   fail(message)         -> always rejects with a user error
//!   crash()               -> exits the process immediately, simulating a worker crash

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use workerpool_core::{PoolError, UserErrorMessage, WorkerOutcome};
use workerpool_runtime::{serve_stdio, WorkerBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let definition = WorkerBuilder::new()
        .method("add", |params, _ctx| async move {
            let a = params.first().and_then(Value::as_i64).unwrap_or(0);
            let b = params.get(1).and_then(Value::as_i64).unwrap_or(0);
            Ok(WorkerOutcome::Plain(Value::from(a + b)))
        })
        .method("echo", |params, ctx| async move {
            ctx.emit(Value::from("received"));
            Ok(WorkerOutcome::Plain(params.into_iter().next().unwrap_or(Value::Null)))
        })
        .method("delay", |params, _ctx| async move {
            let ms = params.first().and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            Ok(WorkerOutcome::Plain(params.into_iter().nth(1).unwrap_or(Value::Null)))
        })
        .method("fail", |params, _ctx| async move {
            let message = params
                .first()
                .and_then(Value::as_str)
                .unwrap_or("fail")
                .to_string();
            Err(PoolError::UserError {
                method: "fail".to_string(),
                source: UserErrorMessage(message),
            })
        })
        .method("crash", |_params, _ctx| async move {
            tracing::warn!("crash method invoked, exiting process");
            std::process::exit(1);
            #[allow(unreachable_code)]
            Ok(WorkerOutcome::Plain(Value::Null))
        })
        .build();

    serve_stdio(definition).await?;
    Ok(())
}
