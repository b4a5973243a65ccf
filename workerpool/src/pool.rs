//! The pool scheduler: an actor owning all mutable scheduling state, so the
//! pool runs in a single logical execution context by construction rather
//! than by locking.
//!
//! The actor owns a `pool_tx`/`pool_rx` channel of worker and command
//! events, generalized from a fixed task-completion protocol to the full
//! dispatch/replace/shutdown lifecycle a pool needs.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use workerpool_core::{
    ConfigError, Deferred, FrameBody, PoolError, PoolResult, ResponseOutcome, UserErrorMessage,
    WireErrorPayload,
};

use crate::config::{PoolConfig, WorkerType};
use crate::task::{ExecOptions, Task};
use crate::transport::{spawn_worker, WorkerInbound, WorkerKind, WorkerLink, WorkerProgram};
use crate::worker::WorkerHandle;

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub pending_tasks: usize,
}

enum Command {
    Exec(Task),
    Cancel(u64),
    Stats(oneshot::Sender<PoolStats>),
    Terminate {
        force: bool,
        timeout: Duration,
        reply: oneshot::Sender<()>,
    },
}

/// A settle-once handle to one `exec` call, layering pool-specific
/// side effects (kill the hosting worker) on top of
/// [`workerpool_core::Deferred`]'s generic cancel/timeout primitives.
pub struct Chained<T: Clone + Send + 'static> {
    deferred: Deferred<T>,
    task_id: u64,
    cancel_tx: mpsc::UnboundedSender<Command>,
}

/// What [`Pool::exec`] returns.
pub type TaskHandle = Chained<Value>;

impl<T: Clone + Send + 'static> Chained<T> {
    /// The task id this handle (or the chain it descends from) belongs to.
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub async fn wait(&self) -> PoolResult<T> {
        self.deferred.wait().await
    }

    pub fn then<U, F, Fut>(&self, f: F) -> Chained<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        Chained {
            deferred: self.deferred.then(f),
            task_id: self.task_id,
            cancel_tx: self.cancel_tx.clone(),
        }
    }

    pub fn catch<F, Fut>(&self, f: F) -> Chained<T>
    where
        F: FnOnce(PoolError) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Chained {
            deferred: self.deferred.catch(f),
            task_id: self.task_id,
            cancel_tx: self.cancel_tx.clone(),
        }
    }

    pub fn always<F, Fut>(&self, f: F) -> Chained<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Chained {
            deferred: self.deferred.always(f),
            task_id: self.task_id,
            cancel_tx: self.cancel_tx.clone(),
        }
    }

    /// Reject the root of this chain and, if its task is queued or
    /// in-flight, tell the pool to drop/kill it. Cancelling an in-flight
    /// task forcibly terminates the worker hosting it.
    pub fn cancel(&self) {
        self.deferred.cancel();
        let _ = self.cancel_tx.send(Command::Cancel(self.task_id));
    }

    /// Same propagation as [`Self::cancel`], triggered by a timer instead
    /// of the caller.
    pub fn timeout(self, duration: Duration) -> Self {
        let cancel_tx = self.cancel_tx.clone();
        let task_id = self.task_id;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = cancel_tx.send(Command::Cancel(task_id));
        });
        Self {
            deferred: self.deferred.timeout(duration),
            task_id,
            cancel_tx,
        }
    }
}

/// The pool scheduler's public handle. Cheap to clone conceptually (it's
/// just channel senders), but cloning isn't exposed since one `Pool` value
/// already represents the whole scheduler — callers share `&Pool`.
pub struct Pool {
    cmd_tx: mpsc::UnboundedSender<Command>,
    next_task_id: Arc<AtomicU64>,
    terminated: Arc<AtomicBool>,
}

impl Pool {
    /// Build a pool. Cross-checks `config.worker_type` against what
    /// `program` can actually satisfy.
    pub fn new(config: PoolConfig, program: WorkerProgram) -> Result<Self, ConfigError> {
        match (config.worker_type, program.kind()) {
            (WorkerType::Thread, WorkerKind::Process) => return Err(ConfigError::ThreadProgramMissing),
            (WorkerType::Process, WorkerKind::Thread) => return Err(ConfigError::ProcessProgramMissing),
            _ => {}
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (worker_event_tx, worker_event_rx) = mpsc::unbounded_channel();
        let (spawn_tx, spawn_rx) = mpsc::unbounded_channel();

        let actor = PoolActor {
            config,
            program,
            workers: Vec::new(),
            queue: VecDeque::new(),
            next_worker_id: 0,
            pending_spawns: 0,
            worker_event_tx,
            worker_event_rx,
            spawn_tx,
            spawn_rx,
            cmd_rx,
            terminated: false,
        };
        tokio::spawn(actor.run());

        Ok(Self {
            cmd_tx,
            next_task_id: Arc::new(AtomicU64::new(1)),
            terminated: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Submit a method invocation.
    pub fn exec(&self, method: impl Into<String>, params: Vec<Value>) -> TaskHandle {
        self.exec_with_options(method, params, ExecOptions::default())
    }

    /// As [`Self::exec`], with an `onEvent` callback and/or transferables.
    pub fn exec_with_options(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        options: ExecOptions,
    ) -> TaskHandle {
        let method = method.into();
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let (deferred, settler) = Deferred::<Value>::new(task_id);

        if method.is_empty() {
            settler.reject(PoolError::UnknownMethod(method));
        } else if self.terminated.load(Ordering::SeqCst) {
            settler.reject(PoolError::PoolTerminated { task_id });
        } else {
            let task = Task::new(task_id, method, params, options, settler);
            let _ = self.cmd_tx.send(Command::Exec(task));
        }

        TaskHandle {
            deferred,
            task_id,
            cancel_tx: self.cmd_tx.clone(),
        }
    }

    /// Current occupancy snapshot.
    pub async fn stats(&self) -> PoolStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stats(reply_tx)).is_err() {
            return PoolStats::default();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Shut the pool down. After this resolves, further `exec` calls fail
    /// immediately with `PoolTerminated`.
    pub async fn terminate(&self, force: bool, timeout: Duration) {
        self.terminated.store(true, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Terminate {
                force,
                timeout,
                reply: reply_tx,
            })
            .is_err()
        {
            return;
        }
        let _ = reply_rx.await;
    }
}

/// Owns every piece of mutable scheduling state; runs as a single spawned
/// task so nothing here needs a lock.
struct PoolActor {
    config: PoolConfig,
    program: WorkerProgram,
    workers: Vec<WorkerHandle>,
    queue: VecDeque<Task>,
    next_worker_id: u64,
    /// Spawn attempts in flight but not yet reflected in `workers`, so
    /// `dispatch`/`replenish_min_workers` don't over-spawn while a previous
    /// request is still being fulfilled asynchronously.
    pending_spawns: usize,
    worker_event_tx: mpsc::UnboundedSender<(u64, WorkerInbound)>,
    worker_event_rx: mpsc::UnboundedReceiver<(u64, WorkerInbound)>,
    spawn_tx: mpsc::UnboundedSender<(u64, std::io::Result<WorkerLink>)>,
    spawn_rx: mpsc::UnboundedReceiver<(u64, std::io::Result<WorkerLink>)>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    terminated: bool,
}

impl PoolActor {
    async fn run(mut self) {
        self.replenish_min_workers();
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
                Some((worker_id, inbound)) = self.worker_event_rx.recv() => {
                    self.handle_inbound(worker_id, inbound).await;
                }
                Some((worker_id, result)) = self.spawn_rx.recv() => {
                    self.handle_spawn_result(worker_id, result);
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Exec(task) => {
                self.queue.push_back(task);
                self.dispatch();
            }
            Command::Cancel(task_id) => self.handle_cancel(task_id).await,
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Terminate { force, timeout, reply } => {
                self.handle_terminate(force, timeout).await;
                let _ = reply.send(());
            }
        }
    }

    fn stats(&self) -> PoolStats {
        let total_workers = self.workers.len();
        let busy_workers = self.workers.iter().filter(|w| w.pending.is_some()).count();
        PoolStats {
            total_workers,
            busy_workers,
            idle_workers: total_workers - busy_workers,
            pending_tasks: self.queue.len(),
        }
    }

    async fn handle_cancel(&mut self, task_id: u64) {
        if let Some(pos) = self.queue.iter().position(|t| t.id == task_id) {
            if let Some(task) = self.queue.remove(pos) {
                task.settler.reject(PoolError::Cancelled { task_id });
            }
            return;
        }

        if let Some(idx) = self
            .workers
            .iter()
            .position(|w| w.pending.as_ref().is_some_and(|t| t.id == task_id))
        {
            self.retire_worker(idx, PoolError::Cancelled { task_id }).await;
        }
    }

    async fn handle_inbound(&mut self, worker_id: u64, inbound: WorkerInbound) {
        let Some(idx) = self.workers.iter().position(|w| w.id == worker_id) else {
            return;
        };

        match inbound {
            WorkerInbound::Frame(frame) => match frame.body {
                FrameBody::Ready => {
                    self.workers[idx].mark_ready();
                    self.dispatch();
                }
                FrameBody::Event(event) => {
                    if let Some(task) = self.workers[idx].pending.as_ref() {
                        if task.id == frame.request_id {
                            if let Some(on_event) = &task.on_event {
                                on_event(event.payload);
                            }
                        }
                    }
                }
                FrameBody::Response(body) => {
                    if let Some(task) = self.workers[idx].take_pending() {
                        if task.id == frame.request_id {
                            match body.outcome {
                                ResponseOutcome::Ok { result, .. } => {
                                    task.settler.resolve(result);
                                }
                                ResponseOutcome::Err { error } => {
                                    task.settler.reject(wire_error_to_pool_error(&task.method, error));
                                }
                            }
                        } else {
                            tracing::warn!(
                                worker_id,
                                expected = task.id,
                                got = frame.request_id,
                                "response id mismatch, dropping"
                            );
                        }
                    }
                    self.dispatch();
                }
                FrameBody::Request(_) | FrameBody::Terminate => {
                    tracing::warn!(worker_id, "unexpected frame kind received from worker");
                }
            },
            WorkerInbound::Closed => {
                self.retire_worker_crash(idx).await;
            }
        }
    }

    async fn retire_worker_crash(&mut self, idx: usize) {
        let task_id = self.workers[idx].pending.as_ref().map(|t| t.id).unwrap_or(0);
        self.retire_worker(idx, PoolError::WorkerTerminated { task_id }).await;
    }

    /// Remove worker `idx`, reject its in-flight task (if any) with
    /// `reject_with`, kill its transport, fire `onTerminateWorker`, and —
    /// unless the pool itself is shutting down — replenish `minWorkers`
    /// and re-run dispatch.
    async fn retire_worker(&mut self, idx: usize, reject_with: PoolError) {
        let mut worker = self.workers.remove(idx);
        if let Some(task) = worker.pending.take() {
            task.settler.reject(reject_with);
        }
        worker.kill().await;

        if let Some(hook) = &self.config.on_terminate_worker {
            hook(worker.id as usize);
        }

        if !self.terminated {
            self.replenish_min_workers();
            self.dispatch();
        }
    }

    fn handle_spawn_result(&mut self, worker_id: u64, result: std::io::Result<WorkerLink>) {
        self.pending_spawns = self.pending_spawns.saturating_sub(1);
        match result {
            Ok(link) => {
                self.workers.push(WorkerHandle::new(worker_id, link));
            }
            Err(err) => {
                tracing::error!(worker_id, error = %err, "failed to spawn worker");
            }
        }
    }

    /// Dispatch algorithm: FIFO head task, least-recently-used eligible
    /// worker, else spawn if under `maxWorkers`, else leave queued.
    fn dispatch(&mut self) {
        while let Some(task) = self.queue.pop_front() {
            match self.pick_eligible_worker() {
                Some(idx) => {
                    if let Err(task) = self.workers[idx].dispatch(task) {
                        self.queue.push_front(task);
                        break;
                    }
                }
                None => {
                    if self.workers.len() + self.pending_spawns < self.config.max_workers {
                        self.queue.push_front(task);
                        self.spawn_worker();
                        break;
                    }
                    self.queue.push_front(task);
                    break;
                }
            }
        }
    }

    fn pick_eligible_worker(&self) -> Option<usize> {
        self.workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.is_eligible())
            .min_by_key(|(_, w)| w.last_dispatched)
            .map(|(idx, _)| idx)
    }

    fn replenish_min_workers(&mut self) {
        while self.workers.len() + self.pending_spawns < self.config.min_workers {
            self.spawn_worker();
        }
    }

    fn spawn_worker(&mut self) {
        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;
        self.pending_spawns += 1;

        let override_ = self
            .config
            .on_create_worker
            .as_ref()
            .and_then(|hook| hook(worker_id as usize));
        let program = self.program.clone();
        let worker_event_tx = self.worker_event_tx.clone();
        let spawn_tx = self.spawn_tx.clone();

        tokio::spawn(async move {
            let result = spawn_worker(worker_id, &program, override_, worker_event_tx).await;
            let _ = spawn_tx.send((worker_id, result));
        });
    }

    async fn handle_terminate(&mut self, force: bool, timeout: Duration) {
        self.terminated = true;

        for task in self.queue.drain(..) {
            let task_id = task.id;
            task.settler.reject(PoolError::PoolTerminated { task_id });
        }

        if force {
            self.kill_all_workers().await;
            return;
        }

        for worker in &mut self.workers {
            worker.request_termination();
        }

        let sleep = tokio::time::sleep(timeout);
        tokio::pin!(sleep);
        while !self.workers.is_empty() {
            tokio::select! {
                _ = &mut sleep => break,
                Some((worker_id, inbound)) = self.worker_event_rx.recv() => {
                    self.handle_inbound(worker_id, inbound).await;
                }
                else => break,
            }
        }

        self.kill_all_workers().await;
    }

    async fn kill_all_workers(&mut self) {
        let indices: Vec<usize> = (0..self.workers.len()).rev().collect();
        for idx in indices {
            let task_id = self.workers[idx].pending.as_ref().map(|t| t.id).unwrap_or(0);
            let mut worker = self.workers.remove(idx);
            if let Some(task) = worker.pending.take() {
                task.settler.reject(PoolError::WorkerTerminated { task_id });
            }
            worker.kill().await;
        }
    }
}

fn wire_error_to_pool_error(method: &str, error: WireErrorPayload) -> PoolError {
    match error.name.as_str() {
        "UnknownMethod" => PoolError::UnknownMethod(method.to_string()),
        _ => PoolError::UserError {
            method: method.to_string(),
            source: UserErrorMessage(error.message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use workerpool_core::WorkerOutcome;
    use workerpool_runtime::WorkerBuilder;

    use crate::config::{MinWorkers, PoolConfigBuilder};

    /// A thread-mode pool running `add`, a slow `delay_echo`, and a method
    /// that emits a progress event before resolving — enough to exercise
    /// dispatch, cancellation, and event delivery without spawning a real
    /// child process.
    fn demo_program() -> WorkerProgram {
        let definition = WorkerBuilder::new()
            .method("add", |params, _ctx| async move {
                let a = params[0].as_i64().unwrap_or(0);
                let b = params[1].as_i64().unwrap_or(0);
                Ok(WorkerOutcome::Plain(Value::from(a + b)))
            })
            .method("delay_echo", |params, _ctx| async move {
                let ms = params[0].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(WorkerOutcome::Plain(params.into_iter().nth(1).unwrap_or(Value::Null)))
            })
            .method("progress_then_done", |_params, ctx| async move {
                ctx.emit(Value::from("progress: 50"));
                Ok(WorkerOutcome::Plain(Value::from("done")))
            })
            .build();
        WorkerProgram::Thread {
            definition: Arc::new(definition),
        }
    }

    fn pool_with(min: usize, max: usize) -> Pool {
        let config = PoolConfigBuilder::new()
            .min_workers(MinWorkers::Count(min))
            .max_workers(max)
            .worker_type(WorkerType::Thread)
            .build()
            .unwrap();
        Pool::new(config, demo_program()).unwrap()
    }

    #[tokio::test]
    async fn happy_path_add() {
        let pool = pool_with(0, 2);
        let handle = pool.exec("add", vec![Value::from(2), Value::from(3)]);
        assert_eq!(handle.wait().await.unwrap(), Value::from(5));
    }

    #[tokio::test]
    async fn fifo_under_saturation() {
        let pool = pool_with(0, 1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3u64 {
            handles.push((i, pool.exec("delay_echo", vec![Value::from(30u64), Value::from(i)])));
        }

        for (expected, handle) in handles {
            let got = handle.wait().await.unwrap();
            order.lock().unwrap().push(got);
            assert_eq!(got, Value::from(expected));
        }
    }

    #[tokio::test]
    async fn cancel_while_queued_does_not_disturb_running_task() {
        let pool = pool_with(0, 1);
        let first = pool.exec("delay_echo", vec![Value::from(100u64), Value::from("first")]);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = pool.exec("delay_echo", vec![Value::from(10u64), Value::from("second")]);
        second.cancel();

        assert!(matches!(second.wait().await, Err(PoolError::Cancelled { .. })));
        assert_eq!(first.wait().await.unwrap(), Value::from("first"));
    }

    #[tokio::test]
    async fn cancel_while_running_rejects_and_pool_recovers() {
        let pool = pool_with(1, 1);
        // Let the replenished worker reach Ready before racing it.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let handle = pool.exec("delay_echo", vec![Value::from(5_000u64), Value::from("x")]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        assert!(matches!(handle.wait().await, Err(PoolError::Cancelled { .. })));

        // Pool should heal back to minWorkers.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = pool.stats().await;
        assert_eq!(stats.total_workers, 1);
    }

    #[tokio::test]
    async fn unknown_method_rejects_without_disturbing_worker() {
        let pool = pool_with(0, 1);
        let handle = pool.exec("nope", vec![]);
        assert!(matches!(handle.wait().await, Err(PoolError::UnknownMethod(m)) if m == "nope"));

        // Worker survives and stays usable.
        let next = pool.exec("add", vec![Value::from(1), Value::from(1)]);
        assert_eq!(next.wait().await.unwrap(), Value::from(2));
    }

    #[tokio::test]
    async fn event_emission_precedes_resolution() {
        let pool = pool_with(0, 1);
        let events: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let events_for_cb = events.clone();

        let options = ExecOptions::new().on_event(move |payload| {
            events_for_cb.lock().unwrap().push(payload);
        });
        let handle = pool.exec_with_options("progress_then_done", vec![], options);

        let result = handle.wait().await.unwrap();
        assert_eq!(result, Value::from("done"));
        assert_eq!(events.lock().unwrap().as_slice(), &[Value::from("progress: 50")]);
    }

    #[tokio::test]
    async fn terminate_rejects_queued_tasks() {
        let pool = pool_with(0, 1);
        let busy = pool.exec("delay_echo", vec![Value::from(200u64), Value::from(0)]);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let queued: Vec<_> = (0..3).map(|i| pool.exec("add", vec![Value::from(i), Value::from(1)])).collect();

        pool.terminate(false, Duration::from_millis(500)).await;

        for handle in queued {
            assert!(matches!(handle.wait().await, Err(PoolError::PoolTerminated { .. })));
        }
        // The in-flight task loses its race against termination too, since
        // soft terminate requests exit from every worker regardless of
        // whether it is currently busy.
        let _ = busy.wait().await;
    }

    #[tokio::test]
    async fn exec_after_terminate_fails_immediately() {
        let pool = pool_with(0, 1);
        pool.terminate(true, Duration::from_millis(10)).await;
        let handle = pool.exec("add", vec![Value::from(1), Value::from(1)]);
        assert!(matches!(handle.wait().await, Err(PoolError::PoolTerminated { .. })));
    }

    #[tokio::test]
    async fn max_workers_never_exceeded_under_concurrent_load() {
        let pool = pool_with(0, 2);
        let handles: Vec<_> = (0..8)
            .map(|i| pool.exec("delay_echo", vec![Value::from(20u64), Value::from(i)]))
            .collect();

        // Poll stats while tasks are in flight; never more than max_workers.
        for _ in 0..5 {
            let stats = pool.stats().await;
            assert!(stats.total_workers <= 2);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for handle in handles {
            handle.wait().await.unwrap();
        }
    }

    #[tokio::test]
    async fn config_rejects_thread_type_with_process_program() {
        let config = PoolConfigBuilder::new()
            .worker_type(WorkerType::Thread)
            .build()
            .unwrap();
        let program = WorkerProgram::Process {
            command: "true".to_string(),
            args: vec![],
        };
        assert!(matches!(
            Pool::new(config, program),
            Err(ConfigError::ThreadProgramMissing)
        ));
    }
}
