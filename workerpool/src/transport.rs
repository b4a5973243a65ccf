//! Spawns a worker and wires its frames to the pool's event loop.
//!
//! A reader task decodes frames off the transport and forwards them into a
//! shared event channel; a writer task drains an outbound channel onto the
//! transport. The pool never touches the transport directly — it only sees
//! `to_worker` (a `Frame` sender) and the `(worker_id, WorkerInbound)` events
//! arriving on its own channel.

use std::process::Stdio;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::join;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use workerpool_core::{Frame, WorkerPoolCodec};
use workerpool_runtime::{WorkerDefinition, WorkerRuntime};

use crate::config::ProcessOverride;

/// How a pool's workers are actually launched. Distinct from
/// [`crate::config::WorkerType`], which is the user's stated intent;
/// `WorkerProgram` is what the pool owner actually wired up to satisfy it.
#[derive(Clone)]
pub enum WorkerProgram {
    /// An OS child process speaking the wire protocol over stdio.
    Process { command: String, args: Vec<String> },
    /// An in-process tokio task serving its own method registry directly
    /// over channels, no OS boundary crossed.
    Thread { definition: Arc<WorkerDefinition> },
}

impl WorkerProgram {
    pub fn kind(&self) -> WorkerKind {
        match self {
            Self::Process { .. } => WorkerKind::Process,
            Self::Thread { .. } => WorkerKind::Thread,
        }
    }
}

/// Which transport a live worker is actually using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Process,
    Thread,
}

/// A frame arriving from a worker, tagged with which worker sent it.
pub enum WorkerInbound {
    Frame(Frame),
    /// The transport ended — process exited or the in-process task
    /// finished — without the pool having asked for it via `terminate`.
    Closed,
}

/// How to forcibly end a spawned worker (`terminate(force)`).
pub enum WorkerKill {
    Process(Child),
    Thread(JoinHandle<()>),
}

impl WorkerKill {
    /// Kill immediately, without waiting for the worker to exit gracefully.
    pub async fn kill(&mut self) {
        match self {
            Self::Process(child) => {
                let _ = child.kill().await;
            }
            Self::Thread(handle) => handle.abort(),
        }
    }
}

/// A spawned worker's link back to the pool.
pub struct WorkerLink {
    pub kind: WorkerKind,
    pub to_worker: mpsc::UnboundedSender<Frame>,
    pub kill: WorkerKill,
}

/// Spawns `program` and wires its frames into `event_tx`, tagged with
/// `worker_id`.
pub async fn spawn_worker(
    worker_id: u64,
    program: &WorkerProgram,
    override_: Option<ProcessOverride>,
    event_tx: mpsc::UnboundedSender<(u64, WorkerInbound)>,
) -> std::io::Result<WorkerLink> {
    match program {
        WorkerProgram::Process { command, args } => {
            spawn_process(worker_id, command, args, override_, event_tx).await
        }
        WorkerProgram::Thread { definition } => {
            Ok(spawn_thread(worker_id, definition.clone(), event_tx))
        }
    }
}

async fn spawn_process(
    worker_id: u64,
    command: &str,
    args: &[String],
    override_: Option<ProcessOverride>,
    event_tx: mpsc::UnboundedSender<(u64, WorkerInbound)>,
) -> std::io::Result<WorkerLink> {
    let mut cmd = Command::new(command);
    cmd.args(args);
    if let Some(override_) = override_ {
        cmd.args(override_.extra_args);
        for (key, value) in override_.extra_env {
            cmd.env(key, value);
        }
    }
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");

    let framed = Framed::new(join(stdout, stdin), WorkerPoolCodec::new());
    let (mut sink, mut stream) = framed.split();

    tokio::spawn(async move {
        while let Some(decoded) = stream.next().await {
            match decoded {
                Ok(frame) => {
                    if event_tx.send((worker_id, WorkerInbound::Frame(frame))).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(worker_id, error = %err, "frame decode error from process worker");
                    break;
                }
            }
        }
        let _ = event_tx.send((worker_id, WorkerInbound::Closed));
    });

    let (to_worker, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    Ok(WorkerLink {
        kind: WorkerKind::Process,
        to_worker,
        kill: WorkerKill::Process(child),
    })
}

fn spawn_thread(
    worker_id: u64,
    definition: Arc<WorkerDefinition>,
    event_tx: mpsc::UnboundedSender<(u64, WorkerInbound)>,
) -> WorkerLink {
    let (to_worker, incoming) = mpsc::unbounded_channel::<Frame>();
    let (outgoing, mut from_worker) = mpsc::unbounded_channel::<Frame>();

    let runtime = WorkerRuntime::new((*definition).clone());
    let handle = tokio::spawn(async move {
        runtime.serve_channels(incoming, outgoing).await;
    });

    let relay_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(frame) = from_worker.recv().await {
            if relay_tx.send((worker_id, WorkerInbound::Frame(frame))).is_err() {
                break;
            }
        }
        let _ = relay_tx.send((worker_id, WorkerInbound::Closed));
    });

    WorkerLink {
        kind: WorkerKind::Thread,
        to_worker,
        kill: WorkerKill::Thread(handle),
    }
}
