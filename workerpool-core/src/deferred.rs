//! A settle-once, promise-like handle for a task result.
//!
//! `Deferred<T>` is produced in pairs with a [`Settler<T>`]: the pool holds
//! the `Deferred` and hands the `Settler` to whichever code ultimately
//! resolves or rejects the task (a worker response, a timeout, a cancel, or
//! pool shutdown). `.then()`/`.catch()`/`.always()` each spawn a lightweight
//! task that waits on the parent's settlement and drives a freshly created
//! child `Deferred`, mirroring how a JS promise chain links without ever
//! blocking a thread.
//!
//! Every `Deferred` produced by a `.then()` chain shares the same
//! [`RootHandle`] as the `Deferred` the chain started from, so `cancel()`
//! and `timeout()` always act on the original task regardless of how many
//! hops deep the caller currently holds a reference.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::PoolError;

pub type PoolResult<T> = Result<T, PoolError>;

struct Inner<T> {
    state: Option<PoolResult<T>>,
    waiters: Vec<oneshot::Sender<PoolResult<T>>>,
}

impl<T> Inner<T> {
    fn new() -> Self {
        Self {
            state: None,
            waiters: Vec::new(),
        }
    }
}

/// Shared by every `Deferred` in a `.then()`/`.catch()`/`.always()` chain so
/// that `cancel()`/`timeout()` always reject the original root task.
struct RootHandle {
    task_id: u64,
    reject: Box<dyn Fn(PoolError) + Send + Sync>,
}

/// A settle-once handle to a task's eventual result.
pub struct Deferred<T: Clone + Send + 'static> {
    task_id: u64,
    inner: Arc<Mutex<Inner<T>>>,
    root: Arc<RootHandle>,
}

/// The producer side of a [`Deferred`]; resolves or rejects it exactly once.
pub struct Settler<T: Clone + Send + 'static> {
    inner: Arc<Mutex<Inner<T>>>,
}

fn settle<T: Clone>(inner: &Arc<Mutex<Inner<T>>>, result: PoolResult<T>) -> bool {
    let mut guard = inner.lock().expect("deferred mutex poisoned");
    if guard.state.is_some() {
        return false;
    }
    guard.state = Some(result.clone());
    for waiter in guard.waiters.drain(..) {
        let _ = waiter.send(result.clone());
    }
    true
}

fn subscribe<T: Clone>(inner: &Arc<Mutex<Inner<T>>>) -> oneshot::Receiver<PoolResult<T>> {
    let (tx, rx) = oneshot::channel();
    let mut guard = inner.lock().expect("deferred mutex poisoned");
    match &guard.state {
        Some(result) => {
            let _ = tx.send(result.clone());
        }
        None => guard.waiters.push(tx),
    }
    rx
}

impl<T: Clone + Send + 'static> Settler<T> {
    /// Resolve the paired `Deferred`. Returns `false` if it was already
    /// settled (at-most-once transition).
    pub fn resolve(&self, value: T) -> bool {
        settle(&self.inner, Ok(value))
    }

    /// Reject the paired `Deferred`. Returns `false` if already settled.
    pub fn reject(&self, err: PoolError) -> bool {
        settle(&self.inner, Err(err))
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Create a new root `Deferred`/`Settler` pair for `task_id`.
    pub fn new(task_id: u64) -> (Self, Settler<T>) {
        let inner = Arc::new(Mutex::new(Inner::new()));
        let reject_inner = inner.clone();
        let root = Arc::new(RootHandle {
            task_id,
            reject: Box::new(move |err| {
                settle(&reject_inner, Err(err));
            }),
        });
        let settler = Settler {
            inner: inner.clone(),
        };
        (
            Self {
                task_id,
                inner,
                root,
            },
            settler,
        )
    }

    fn child_with_root(&self) -> (Arc<Mutex<Inner<T>>>, Arc<RootHandle>) {
        (Arc::new(Mutex::new(Inner::new())), self.root.clone())
    }

    /// The task id this deferred (or the chain it descends from) belongs to.
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Wait for this deferred to settle.
    pub async fn wait(&self) -> PoolResult<T> {
        let rx = subscribe(&self.inner);
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(PoolError::PoolTerminated {
                task_id: self.task_id,
            }),
        }
    }

    /// Chain a continuation that runs on success, producing a new
    /// `Deferred<U>` sharing this chain's root. Rejections propagate
    /// through untouched.
    pub fn then<U, F, Fut>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        let rx = subscribe(&self.inner);
        let task_id = self.task_id;
        let root = self.root.clone();
        let child_inner = Arc::new(Mutex::new(Inner::<U>::new()));
        let settler = Settler {
            inner: child_inner.clone(),
        };

        tokio::spawn(async move {
            match rx.await {
                Ok(Ok(value)) => {
                    let out = f(value).await;
                    settler.resolve(out);
                }
                Ok(Err(err)) => {
                    settler.reject(err);
                }
                Err(_) => {
                    settler.reject(PoolError::PoolTerminated { task_id });
                }
            }
        });

        Deferred {
            task_id,
            inner: child_inner,
            root,
        }
    }

    /// Chain a recovery continuation that runs on rejection, producing a new
    /// `Deferred<T>` sharing this chain's root. Successes propagate through
    /// untouched.
    pub fn catch<F, Fut>(&self, f: F) -> Deferred<T>
    where
        F: FnOnce(PoolError) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let rx = subscribe(&self.inner);
        let task_id = self.task_id;
        let (child_inner, root) = self.child_with_root();
        let settler = Settler {
            inner: child_inner.clone(),
        };

        tokio::spawn(async move {
            match rx.await {
                Ok(Ok(value)) => {
                    settler.resolve(value);
                }
                Ok(Err(err)) => {
                    let recovered = f(err).await;
                    settler.resolve(recovered);
                }
                Err(_) => {
                    settler.reject(PoolError::PoolTerminated { task_id });
                }
            }
        });

        Deferred {
            task_id,
            inner: child_inner,
            root,
        }
    }

    /// Run a side effect regardless of outcome, then pass the original
    /// result through unchanged.
    pub fn always<F, Fut>(&self, f: F) -> Deferred<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rx = subscribe(&self.inner);
        let task_id = self.task_id;
        let (child_inner, root) = self.child_with_root();
        let settler = Settler {
            inner: child_inner.clone(),
        };

        tokio::spawn(async move {
            let result = rx.await;
            f().await;
            match result {
                Ok(Ok(value)) => {
                    settler.resolve(value);
                }
                Ok(Err(err)) => {
                    settler.reject(err);
                }
                Err(_) => {
                    settler.reject(PoolError::PoolTerminated { task_id });
                }
            }
        });

        Deferred {
            task_id,
            inner: child_inner,
            root,
        }
    }

    /// Reject the root of this chain with `Cancelled`. A no-op if the root
    /// already settled.
    pub fn cancel(&self) {
        (self.root.reject)(PoolError::Cancelled {
            task_id: self.root.task_id,
        });
    }

    /// Reject the root of this chain with `TimedOut` if it has not settled
    /// within `duration`. Returns `self` so the call can be chained the way
    /// the original library chains `.timeout(ms)` off a promise.
    pub fn timeout(self, duration: Duration) -> Self {
        let root = self.root.clone();
        let task_id = self.root.task_id;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            (root.reject)(PoolError::TimedOut {
                task_id,
                elapsed_ms: duration.as_millis() as u64,
            });
        });
        self
    }
}

impl<T: Clone + Send + 'static> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            task_id: self.task_id,
            inner: self.inner.clone(),
            root: self.root.clone(),
        }
    }
}
