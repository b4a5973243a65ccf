//! Pool configuration: builder + validation.
//!
//! A plain struct built up through chained setters, validated once at the
//! point of use rather than at every setter call.

use std::sync::Arc;
use std::time::Duration;

use workerpool_core::ConfigError;

/// Which transport a pool's workers should use.
///
/// `Web` has no Rust-native transport and always fails validation; it exists
/// so the config shape mirrors the original library's three-way choice and
/// so requesting it produces a named `ConfigError` instead of silently
/// falling back to another transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerType {
    Auto,
    Web,
    Process,
    Thread,
}

impl Default for WorkerType {
    fn default() -> Self {
        Self::Auto
    }
}

/// `minWorkers`, which the original library accepts as either a count or
/// the literal `"max"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinWorkers {
    Count(usize),
    Max,
}

impl Default for MinWorkers {
    fn default() -> Self {
        Self::Count(0)
    }
}

impl MinWorkers {
    fn resolve(self, max_workers: usize) -> usize {
        match self {
            Self::Count(n) => n,
            Self::Max => max_workers,
        }
    }
}

/// Per-worker-index override a pool owner can apply just before spawning
/// (`onCreateWorker`) — e.g. assigning a unique debug port the
/// way the original library's debug-port allocator would.
#[derive(Debug, Clone, Default)]
pub struct ProcessOverride {
    pub extra_args: Vec<String>,
    pub extra_env: Vec<(String, String)>,
}

pub type OnCreateWorker = Arc<dyn Fn(usize) -> Option<ProcessOverride> + Send + Sync>;
pub type OnTerminateWorker = Arc<dyn Fn(usize) + Send + Sync>;

/// Validated pool configuration.
#[derive(Clone)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub worker_type: WorkerType,
    pub worker_terminate_timeout: Duration,
    pub on_create_worker: Option<OnCreateWorker>,
    pub on_terminate_worker: Option<OnTerminateWorker>,
}

/// Builds a [`PoolConfig`] through chained setters, validated at `build()`.
#[derive(Default)]
pub struct PoolConfigBuilder {
    min_workers: MinWorkers,
    max_workers: Option<usize>,
    worker_type: WorkerType,
    worker_terminate_timeout: Option<Duration>,
    on_create_worker: Option<OnCreateWorker>,
    on_terminate_worker: Option<OnTerminateWorker>,
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_workers(mut self, min_workers: MinWorkers) -> Self {
        self.min_workers = min_workers;
        self
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn worker_type(mut self, worker_type: WorkerType) -> Self {
        self.worker_type = worker_type;
        self
    }

    pub fn worker_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.worker_terminate_timeout = Some(timeout);
        self
    }

    pub fn on_create_worker<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> Option<ProcessOverride> + Send + Sync + 'static,
    {
        self.on_create_worker = Some(Arc::new(f));
        self
    }

    pub fn on_terminate_worker<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_terminate_worker = Some(Arc::new(f));
        self
    }

    /// Default `maxWorkers`: `cpus - 1` if determinable, else 3.
    fn default_max_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1).max(1))
            .unwrap_or(3)
    }

    /// Validate and freeze the configuration, rejecting anything that
    /// can't be satisfied.
    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        let max_workers = self.max_workers.unwrap_or_else(Self::default_max_workers);
        if max_workers == 0 {
            return Err(ConfigError::ZeroMaxWorkers);
        }

        if self.worker_type == WorkerType::Web {
            return Err(ConfigError::UnsupportedWorkerType("Web".to_string()));
        }

        let min_workers = self.min_workers.resolve(max_workers);
        if min_workers > max_workers {
            return Err(ConfigError::MinExceedsMax {
                min: min_workers,
                max: max_workers,
            });
        }

        Ok(PoolConfig {
            min_workers,
            max_workers,
            worker_type: self.worker_type,
            worker_terminate_timeout: self
                .worker_terminate_timeout
                .unwrap_or(Duration::from_millis(1000)),
            on_create_worker: self.on_create_worker,
            on_terminate_worker: self.on_terminate_worker,
        })
    }
}
