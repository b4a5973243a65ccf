//! Pool scheduler: bounded resource management and task dispatch.
//!
//! This is the hardest piece of the workspace: matching
//! pending tasks to idle workers, enforcing `minWorkers`/`maxWorkers`,
//! replacing crashed workers, and shutting workers down gracefully or
//! forcefully. `workerpool-core` supplies the wire protocol and the
//! `Deferred` primitive; `workerpool-runtime` supplies the in-executor
//! side; this crate is the parent-side scheduler that ties them together.

pub mod config;
pub mod pool;
pub mod task;
pub mod transport;
pub mod worker;

pub use config::{MinWorkers, PoolConfig, PoolConfigBuilder, ProcessOverride, WorkerType};
pub use pool::{Chained, Pool, PoolStats, TaskHandle};
pub use task::ExecOptions;
pub use transport::{WorkerKind, WorkerProgram};
pub use worker::{WorkerHandle, WorkerState};

pub use workerpool_core::{ConfigError, PoolError};
