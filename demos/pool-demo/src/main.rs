//! Small CLI exercising a process-mode pool end to end against
//! `echo-worker`.
//!
//! ```text
//! pool-demo                         Run the default add/echo/delay mix
//! pool-demo --max-workers 4         Widen the pool
//! pool-demo --worker-command path   Point at a different worker binary
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use workerpool::{MinWorkers, Pool, PoolConfigBuilder, WorkerProgram, WorkerType};

#[derive(Parser, Debug)]
#[command(name = "pool-demo", about = "Drive a process-mode workerpool against echo-worker")]
struct Cli {
    /// Worker binary to spawn (defaults to the sibling echo-worker build).
    #[arg(long, default_value = "echo-worker")]
    worker_command: PathBuf,

    #[arg(long, default_value_t = 0)]
    min_workers: usize,

    #[arg(long, default_value_t = 2)]
    max_workers: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config = PoolConfigBuilder::new()
        .min_workers(MinWorkers::Count(cli.min_workers))
        .max_workers(cli.max_workers)
        .worker_type(WorkerType::Process)
        .build()?;

    let program = WorkerProgram::Process {
        command: cli.worker_command.to_string_lossy().into_owned(),
        args: vec![],
    };

    let pool = Pool::new(config, program)?;

    info!("submitting add(2, 3)");
    let sum = pool.exec("add", vec![Value::from(2), Value::from(3)]);
    info!(result = ?sum.wait().await, "add done");

    info!("submitting a batch of delay() calls to observe dispatch spreading");
    let mut handles = Vec::new();
    for i in 0..4u64 {
        handles.push(pool.exec("delay", vec![Value::from(50u64), Value::from(i)]));
    }
    for handle in handles {
        info!(result = ?handle.wait().await, "delay done");
    }

    info!("submitting fail(\"boom\")");
    let failed = pool.exec("fail", vec![Value::from("boom")]);
    info!(result = ?failed.wait().await, "fail done (expected error)");

    let stats = pool.stats().await;
    info!(?stats, "pool occupancy before shutdown");

    pool.terminate(false, Duration::from_secs(2)).await;
    info!("pool terminated cleanly");

    Ok(())
}
