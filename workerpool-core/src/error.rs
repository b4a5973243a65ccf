//! Shared error taxonomy for the workerpool workspace.
//!
//! Splits a transport-level error (`WireError`, here) from higher-level
//! operational errors (`PoolError`, `ConfigError`). Every variant maps to one
//! of the outcomes a caller of `Deferred` can observe.

use thiserror::Error;

/// Errors produced while encoding/decoding frames on the wire.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame magic mismatch")]
    InvalidMagic,

    #[error("malformed frame header: {0}")]
    InvalidHeader(&'static str),

    #[error("unknown frame kind discriminant: {0}")]
    UnknownFrameKind(u32),

    #[error("checksum mismatch: frame payload was corrupted in transit")]
    ChecksumMismatch,

    #[error("frame payload of {actual} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { actual: u64, limit: u64 },

    #[error("failed to serialize frame payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("io error on transport: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to a `Deferred` when a task cannot complete normally.
///
/// Covers the full failure taxonomy a task can end in: unknown method, user
/// error, worker crash, cancellation, timeout, or pool shutdown. Config
/// problems get their own dedicated type, [`ConfigError`], since they are
/// raised before a pool exists rather than against an in-flight task.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The worker has no method registered under this name.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// The method body ran and returned an application-level error.
    #[error("worker method {method} failed: {source}")]
    UserError {
        method: String,
        source: UserErrorMessage,
    },

    /// The worker exited (crash or unexpected close) while a task was
    /// outstanding on it.
    #[error("worker terminated while task {task_id} was in flight")]
    WorkerTerminated { task_id: u64 },

    /// `Deferred::cancel()` was called before settlement.
    #[error("task {task_id} was cancelled")]
    Cancelled { task_id: u64 },

    /// `Deferred::timeout()` elapsed before settlement.
    #[error("task {task_id} timed out after {elapsed_ms}ms")]
    TimedOut { task_id: u64, elapsed_ms: u64 },

    /// The pool was terminated with tasks still queued or in flight.
    #[error("pool terminated with task {task_id} unresolved")]
    PoolTerminated { task_id: u64 },

    /// Wraps a configuration problem discovered while building a pool, so
    /// callers that only handle `PoolError` can still see it if a config
    /// problem surfaces indirectly through a `Deferred`.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// A cloneable stand-in for an arbitrary user-method failure message.
///
/// The worker side returns application errors as plain strings/JSON over the
/// wire; this wraps that payload so `PoolError::UserError` can
/// still implement `std::error::Error`.
#[derive(Debug, Clone)]
pub struct UserErrorMessage(pub String);

impl std::fmt::Display for UserErrorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for UserErrorMessage {}

/// Raised when a `PoolConfig` cannot be satisfied by this host, or is
/// internally inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("worker type {0:?} has no Rust-native transport on this host")]
    UnsupportedWorkerType(String),

    #[error("min_workers ({min}) exceeds max_workers ({max})")]
    MinExceedsMax { min: usize, max: usize },

    #[error("max_workers must be at least 1")]
    ZeroMaxWorkers,

    #[error("worker_type requests Thread but no in-process method registry was supplied")]
    ThreadProgramMissing,

    #[error("worker_type requests Process but no process command template was supplied")]
    ProcessProgramMissing,

    #[error("failed to detect host parallelism: {0}")]
    ParallelismDetection(#[from] std::io::Error),
}

/// A frame-level error payload, the wire representation of a `PoolError`.
/// Built explicitly rather than via reflection, since Rust errors don't
/// expose "own properties".
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WireErrorPayload {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WireErrorPayload {
    pub fn from_user_error(method: &str, message: impl Into<String>) -> Self {
        Self {
            name: "UserError".to_string(),
            message: format!("{method}: {}", message.into()),
            stack: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn from_unknown_method(method: &str) -> Self {
        Self {
            name: "UnknownMethod".to_string(),
            message: format!("unknown method: {method}"),
            stack: None,
            extra: serde_json::Map::new(),
        }
    }
}
