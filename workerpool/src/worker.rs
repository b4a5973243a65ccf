//! Parent-side handle to one executor.

use std::time::Instant;

use workerpool_core::{Frame, RequestBody};

use crate::task::Task;
use crate::transport::{WorkerKill, WorkerKind, WorkerLink};

/// A worker's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    Ready,
    Busy,
    Terminating,
    Terminated,
}

/// One executor the pool owns: its transport link, lifecycle state, and at
/// most one in-flight task (baseline is one-in-flight-per-worker).
pub struct WorkerHandle {
    pub id: u64,
    pub kind: WorkerKind,
    pub state: WorkerState,
    pub pending: Option<Task>,
    /// When this worker was last handed a task; `None` if never used.
    /// Drives the dispatch algorithm's least-recently-used tie-break
    /// (spreads wear across workers).
    pub last_dispatched: Option<Instant>,
    to_worker: tokio::sync::mpsc::UnboundedSender<Frame>,
    kill: WorkerKill,
}

impl WorkerHandle {
    pub fn new(id: u64, link: WorkerLink) -> Self {
        Self {
            id,
            kind: link.kind,
            state: WorkerState::Initializing,
            pending: None,
            last_dispatched: None,
            to_worker: link.to_worker,
            kill: link.kill,
        }
    }

    /// Eligible for dispatch iff ready and not already serving a task
    /// (ready and not already serving a task).
    pub fn is_eligible(&self) -> bool {
        self.state == WorkerState::Ready && self.pending.is_none()
    }

    /// Mark the worker ready after it has sent its handshake frame.
    pub fn mark_ready(&mut self) {
        if self.state == WorkerState::Initializing {
            self.state = WorkerState::Ready;
        }
    }

    /// Send `task` to this worker and bind it as the in-flight task.
    pub fn dispatch(&mut self, task: Task) -> Result<(), Task> {
        let body = RequestBody {
            method: task.method.clone(),
            params: task.params.clone(),
            transferables: task.transferables.clone(),
        };
        if self.to_worker.send(Frame::request(task.id, body)).is_err() {
            return Err(task);
        }
        self.state = WorkerState::Busy;
        self.last_dispatched = Some(Instant::now());
        self.pending = Some(task);
        Ok(())
    }

    /// Take back the in-flight task (response arrived, or the worker is
    /// being torn down) and mark the worker ready for more work.
    pub fn take_pending(&mut self) -> Option<Task> {
        let task = self.pending.take();
        if self.state == WorkerState::Busy {
            self.state = WorkerState::Ready;
        }
        task
    }

    /// Request graceful exit (sends the terminate sentinel).
    pub fn request_termination(&mut self) {
        self.state = WorkerState::Terminating;
        let _ = self.to_worker.send(Frame::terminate());
    }

    /// Forcibly end the worker's transport.
    pub async fn kill(&mut self) {
        self.kill.kill().await;
        self.state = WorkerState::Terminated;
    }
}
